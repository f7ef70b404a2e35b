pub mod commit;
pub mod diff;
pub mod verify;
pub mod write;
