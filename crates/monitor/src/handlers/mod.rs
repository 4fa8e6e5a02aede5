pub mod alerts;
pub mod campaigns;
pub mod status;
