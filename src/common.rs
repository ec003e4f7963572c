use std::fmt::Display;

use tracing::error;

/// Log if the result is an error
pub trait Logged {
    fn log(self) -> Self;
}

impl<T: Sized, E: Display> Logged for Result<T, E> {
    fn log(self) -> Self {
        match &self {
            Ok(_) => {}
            Err(e) => error!("{}", e),
        }
        self
    }
}

/// Call a function by using the object as the receiver.
/// e.g. show some logs when a value has been computed
pub trait Appliable
where
    Self: Sized,
{
    /// Call function that may mutate the state of `self`
    fn apply<F>(self, f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        f(self)
    }

    /// Call function that doesn't mutate the state of `self`
    fn then<F>(self, f: F) -> Self
    where
        F: FnOnce(&Self),
    {
        f(&self);
        self
    }
}

/// Every sized type can be applied
impl<T> Appliable for T where T: Sized {}
