pub mod cache;
pub mod collision;
pub mod io;
pub mod mesh;
pub mod settings;
pub mod util;
