pub mod decoders;
pub mod output;
pub mod source;
