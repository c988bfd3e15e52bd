pub mod intent;
pub mod kernel;
pub mod services;
pub mod transport;

pub use kernel::dispatcher::{Dispatcher, TurnOutcome};
pub use kernel::error::{KernelError, RegistrationError};
