use std::fmt;

use enginebridge_core::{BridgeError, NativeError};

use super::call::VirtualCall;
use super::class::{ExtensionClass, VirtualSignature};

/// Host implementation of a virtual method.
pub type VirtualFn<T> = fn(&mut T, &mut VirtualCall<'_>) -> Result<(), NativeError>;

/// Collects the virtual methods an [`ExtensionClass`] overrides.
///
/// Names are checked against the parent's descriptor as they are added; the
/// first problem is reported when the class is registered.
pub struct ClassBuilder<T: ExtensionClass> {
    virtuals: Vec<(&'static VirtualSignature, VirtualFn<T>)>,
    errors: Vec<BridgeError>,
    max_args: usize,
}

impl<T: ExtensionClass> ClassBuilder<T> {
    pub(crate) fn new(max_args: usize) -> Self {
        Self {
            virtuals: Vec::new(),
            errors: Vec::new(),
            max_args,
        }
    }

    /// Override the parent's virtual `name`. Registering a name twice keeps
    /// the last handler.
    pub fn virtual_method(&mut self, name: &str, handler: VirtualFn<T>) -> &mut Self {
        let Some(signature) = T::PARENT.virtual_named(name) else {
            self.errors.push(BridgeError::UnknownVirtual {
                class: T::CLASS_NAME.to_string(),
                parent: T::PARENT.name.to_string(),
                method: name.to_string(),
            });
            return self;
        };
        if signature.args > self.max_args {
            self.errors.push(
                NativeError::other(format!(
                    "virtual {} takes {} arguments, more than the limit of {}",
                    name, signature.args, self.max_args
                ))
                .into(),
            );
            return self;
        }
        self.virtuals.retain(|(existing, _)| existing.name != name);
        self.virtuals.push((signature, handler));
        self
    }

    pub fn len(&self) -> usize {
        self.virtuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.virtuals.is_empty()
    }

    pub(crate) fn finish(
        self,
    ) -> Result<Vec<(&'static VirtualSignature, VirtualFn<T>)>, BridgeError> {
        match self.errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(self.virtuals),
        }
    }
}

impl<T: ExtensionClass> fmt::Debug for ClassBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.virtuals.iter().map(|(sig, _)| sig.name).collect();
        f.debug_struct("ClassBuilder")
            .field("class", &T::CLASS_NAME)
            .field("virtuals", &names)
            .field("errors", &self.errors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::class::{InstanceBase, ParentClass, parents};

    struct Ticker;

    impl ExtensionClass for Ticker {
        const CLASS_NAME: &'static str = "Ticker";
        const PARENT: &'static ParentClass = &parents::NODE;

        fn create(_base: InstanceBase) -> Self {
            Ticker
        }
    }

    fn noop(_: &mut Ticker, _: &mut VirtualCall<'_>) -> Result<(), NativeError> {
        Ok(())
    }

    #[test]
    fn declared_virtuals_are_accepted() {
        let mut builder = ClassBuilder::<Ticker>::new(16);
        builder.virtual_method("_ready", noop).virtual_method("_process", noop);
        builder.virtual_method("_ready", noop);
        assert_eq!(builder.len(), 2);
        assert_eq!(builder.finish().unwrap().len(), 2);
    }

    #[test]
    fn undeclared_virtual_is_rejected() {
        let mut builder = ClassBuilder::<Ticker>::new(16);
        builder.virtual_method("_tick", noop);
        assert_eq!(
            builder.finish().unwrap_err(),
            BridgeError::UnknownVirtual {
                class: "Ticker".into(),
                parent: "Node".into(),
                method: "_tick".into(),
            }
        );
    }

    #[test]
    fn argument_limit_is_enforced() {
        let mut builder = ClassBuilder::<Ticker>::new(0);
        builder.virtual_method("_process", noop);
        assert!(builder.finish().is_err());
    }
}
