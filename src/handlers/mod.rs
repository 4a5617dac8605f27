pub mod stt;

pub use stt::recognize_upload;
