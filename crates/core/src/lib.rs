pub mod cast;
pub mod config;
pub mod decode;
pub mod dictation;
pub mod generation;
pub mod llm;
pub mod persist;
pub mod persona;
pub mod playback;
pub mod quota;
pub mod rehearsal;
pub mod script;
pub mod tts;
pub mod util;
pub mod voices;
