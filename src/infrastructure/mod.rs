pub mod access_point;
pub mod bench;
pub mod cellular;
pub mod logging;
pub mod radio;
