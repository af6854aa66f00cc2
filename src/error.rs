use std::io;

use crate::harness::Phase;


pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Illegal phase transition from {from:?} to {to:?}")]
    Phase { from: Phase, to: Phase },

    #[error("Could not raise stop signal")]
    SelfStop { source: nix::Error },

    #[error("Input/output error")]
    IO(#[from] io::Error),

    #[error("OS error")]
    OS(#[from] nix::Error),
}
