mod context_pipeline;
mod session_service;
mod wire_decoding;
