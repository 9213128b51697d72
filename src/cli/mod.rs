//! Terminal front end for `walletctl`

pub mod chooser;
pub mod commands;

pub use chooser::DialoguerChooser;
