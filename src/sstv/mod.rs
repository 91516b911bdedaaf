pub mod decode;
pub mod scanner;

pub use decode::{decode_recording, SstvDecodeError, SstvDiagnostics, Verdict};
pub use scanner::{CarrierSensor, SstvCapture, SstvScanner};
