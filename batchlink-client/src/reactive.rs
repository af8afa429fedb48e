use tokio::sync::watch;

/// A configuration value that is either fixed or follows a `watch` channel.
/// Reactive values are read once per call, when the operation is created.
#[derive(Debug, Clone)]
pub enum MaybeReactive<T> {
    Plain(T),
    Reactive(watch::Receiver<T>),
}

impl<T: Clone> MaybeReactive<T> {
    /// Current value.
    pub fn get(&self) -> T {
        match self {
            MaybeReactive::Plain(value) => value.clone(),
            MaybeReactive::Reactive(rx) => rx.borrow().clone(),
        }
    }

    pub fn is_reactive(&self) -> bool {
        matches!(self, MaybeReactive::Reactive(_))
    }
}

impl<T: Default> Default for MaybeReactive<T> {
    fn default() -> Self {
        MaybeReactive::Plain(T::default())
    }
}

impl<T> From<T> for MaybeReactive<T> {
    fn from(value: T) -> Self {
        MaybeReactive::Plain(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_value() {
        let value = MaybeReactive::from(3);
        assert_eq!(value.get(), 3);
        assert!(!value.is_reactive());
    }

    #[test]
    fn test_reactive_value_tracks_sender() {
        let (tx, rx) = watch::channel("v1".to_string());
        let value = MaybeReactive::Reactive(rx);
        assert_eq!(value.get(), "v1");
        tx.send("v2".to_string()).unwrap();
        assert_eq!(value.get(), "v2");
    }
}
