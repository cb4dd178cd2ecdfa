pub mod completion;
pub mod conversation;
pub mod message;
pub mod role;
pub mod tool;
