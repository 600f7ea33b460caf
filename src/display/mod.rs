mod bridge;
mod descriptor;
mod display_registry;
mod identity;
mod mode;
mod settings;
mod virtual_display;


pub use bridge::*;
pub use descriptor::*;
pub use display_registry::*;
pub use identity::*;
pub use mode::*;
pub use settings::*;
pub use virtual_display::*;
