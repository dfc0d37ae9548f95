pub mod conductivity;
pub mod linalg;
pub mod orientation;
