pub mod cabinet;
pub mod dialogue;
pub mod extractor;
pub mod intent;
pub mod scheduling;
pub mod session;
