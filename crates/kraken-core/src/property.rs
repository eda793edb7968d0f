//! Typed, named suppliers bound to a task.
//!
//! A [`Property`] is how tasks expose inputs and outputs. Binding the input
//! property of one task to the output property of another wires the two
//! tasks together; the task graph later turns that wiring into implicit
//! strict edges by walking property lineage.

use crate::identifier::TaskId;
use crate::supplier::{AnySupplier, PropertyOwner, Supplier, SupplierNode};
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

assert_impl_all!(AnyProperty: Send, Sync, Clone);

/// The flavor of a property. Input properties become read-only when their
/// task is finalized; output properties stay writable so the executing task
/// can publish its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Input,
    Output,
}

/// Errors raised by property access.
#[derive(Debug, thiserror::Error)]
pub enum PropertyError {
    #[error("property {owner:?} has no value set")]
    EmptyValue { owner: PropertyOwner },
    #[error("property {owner:?} is finalized and can no longer change")]
    Finalized { owner: PropertyOwner },
    #[error("property {owner:?} holds {found}, not {expected}")]
    TypeMismatch {
        owner: PropertyOwner,
        expected: &'static str,
        found: &'static str,
    },
}

enum PropertyValue<T: Clone + Send + Sync + 'static> {
    Unset,
    Value(T),
    Bound(Supplier<T>),
}

struct PropertyState<T: Clone + Send + Sync + 'static> {
    value: PropertyValue<T>,
    finalized: bool,
}

struct PropertyShared<T: Clone + Send + Sync + 'static> {
    owner: PropertyOwner,
    kind: PropertyKind,
    state: RwLock<PropertyState<T>>,
}

impl<T: Clone + Send + Sync + 'static> PropertyShared<T> {
    fn try_get(&self) -> Option<T> {
        // the bound supplier is cloned out so the lock is not held while
        // upstream suppliers evaluate
        let source = {
            let state = self.state.read();
            match &state.value {
                PropertyValue::Unset => return None,
                PropertyValue::Value(v) => return Some(v.clone()),
                PropertyValue::Bound(s) => s.clone(),
            }
        };
        source.try_get()
    }
}

impl<T: Clone + Send + Sync + 'static> SupplierNode for PropertyShared<T> {
    fn derived_from(&self) -> Vec<AnySupplier> {
        let state = self.state.read();
        match &state.value {
            PropertyValue::Bound(s) => vec![s.erased()],
            _ => vec![],
        }
    }

    fn owner(&self) -> Option<PropertyOwner> {
        Some(self.owner.clone())
    }

    fn missing_message(&self) -> String {
        format!("property {:?} has no value set", self.owner)
    }
}

/// A named, owner-bound supplier whose value can be set, unset, or piped
/// from another supplier. Clones share state.
pub struct Property<T: Clone + Send + Sync + 'static> {
    shared: Arc<PropertyShared<T>>,
}

impl<T: Clone + Send + Sync + 'static> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Property<T> {
    pub fn new(owner: TaskId, name: &str, kind: PropertyKind) -> Self {
        Self {
            shared: Arc::new(PropertyShared {
                owner: PropertyOwner {
                    task: owner,
                    property: name.to_string(),
                },
                kind,
                state: RwLock::new(PropertyState {
                    value: PropertyValue::Unset,
                    finalized: false,
                }),
            }),
        }
    }

    pub fn input(owner: TaskId, name: &str) -> Self {
        Self::new(owner, name, PropertyKind::Input)
    }

    pub fn output(owner: TaskId, name: &str) -> Self {
        Self::new(owner, name, PropertyKind::Output)
    }

    /// The task this property belongs to.
    pub fn owner(&self) -> &TaskId {
        &self.shared.owner.task
    }

    pub fn name(&self) -> &str {
        &self.shared.owner.property
    }

    pub fn kind(&self) -> PropertyKind {
        self.shared.kind
    }

    fn mutate(
        &self,
        apply: impl FnOnce(&mut PropertyValue<T>),
    ) -> Result<(), PropertyError> {
        let mut state = self.shared.state.write();
        if state.finalized {
            return Err(PropertyError::Finalized {
                owner: self.shared.owner.clone(),
            });
        }
        apply(&mut state.value);
        Ok(())
    }

    /// Set the property to a concrete value.
    pub fn set(&self, value: impl Into<T>) -> Result<(), PropertyError> {
        let value = value.into();
        self.mutate(|v| *v = PropertyValue::Value(value))
    }

    /// Pipe the property from a supplier. The supplier is evaluated on every
    /// read, and its lineage becomes part of this property's lineage.
    pub fn bind(&self, supplier: Supplier<T>) -> Result<(), PropertyError> {
        self.mutate(|v| *v = PropertyValue::Bound(supplier))
    }

    /// Pipe the property from another property.
    pub fn set_from(&self, other: &Property<T>) -> Result<(), PropertyError> {
        self.bind(other.as_supplier())
    }

    /// Unset the property.
    pub fn clear(&self) -> Result<(), PropertyError> {
        self.mutate(|v| *v = PropertyValue::Unset)
    }

    /// Render the property immutable. Idempotent.
    pub fn finalize(&self) {
        self.shared.state.write().finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.shared.state.read().finalized
    }

    /// Whether a value source is present. A property bound to an empty
    /// supplier is set but still produces no value.
    pub fn is_set(&self) -> bool {
        !matches!(self.shared.state.read().value, PropertyValue::Unset)
    }

    /// Get the value of the property.
    pub fn get(&self) -> Result<T, PropertyError> {
        self.shared
            .try_get()
            .ok_or_else(|| PropertyError::EmptyValue {
                owner: self.shared.owner.clone(),
            })
    }

    pub fn try_get(&self) -> Option<T> {
        self.shared.try_get()
    }

    pub fn get_or(&self, default: T) -> T {
        self.try_get().unwrap_or(default)
    }

    /// Map the value of this property into a new supplier.
    pub fn map<R, F>(&self, transform: F) -> Supplier<R>
    where
        R: Clone + Send + Sync + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        self.as_supplier().map(transform)
    }

    /// View the property as a supplier. The returned supplier reads through
    /// this property and carries its identity in lineage traversals.
    pub fn as_supplier(&self) -> Supplier<T> {
        let shared = self.shared.clone();
        Supplier::from_node(self.shared.clone(), move || shared.try_get())
    }

    /// The lineage of this property: every supplier its value is derived
    /// from, including the property itself.
    pub fn lineage(&self) -> Vec<AnySupplier> {
        AnySupplier::new(self.shared.clone()).lineage()
    }
}

impl<T: Clone + Send + Sync + Debug + 'static> Debug for Property<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("owner", &self.shared.owner)
            .field("kind", &self.shared.kind)
            .field("value", &self.try_get())
            .finish()
    }
}

/// Type-erasing property plumbing, used by the task schema.
trait ErasedProperty: Send + Sync {
    fn property_owner(&self) -> PropertyOwner;
    fn kind(&self) -> PropertyKind;
    fn finalize(&self);
    fn is_finalized(&self) -> bool;
    fn erased_supplier(&self) -> AnySupplier;
    fn type_name(&self) -> &'static str;
}

impl<T: Clone + Send + Sync + 'static> ErasedProperty for Property<T> {
    fn property_owner(&self) -> PropertyOwner {
        self.shared.owner.clone()
    }

    fn kind(&self) -> PropertyKind {
        self.shared.kind
    }

    fn finalize(&self) {
        Property::finalize(self)
    }

    fn is_finalized(&self) -> bool {
        Property::is_finalized(self)
    }

    fn erased_supplier(&self) -> AnySupplier {
        AnySupplier::new(self.shared.clone())
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A property with the value type erased. Tasks store their schema as
/// `AnyProperty` entries; typed access goes through
/// [`as_typed`](AnyProperty::as_typed).
#[derive(Clone)]
pub struct AnyProperty {
    erased: Arc<dyn ErasedProperty>,
    any: Arc<dyn Any + Send + Sync>,
    ty: TypeId,
}

impl<T: Clone + Send + Sync + 'static> From<Property<T>> for AnyProperty {
    fn from(prop: Property<T>) -> Self {
        Self {
            erased: Arc::new(prop.clone()),
            any: Arc::new(prop),
            ty: TypeId::of::<T>(),
        }
    }
}

impl AnyProperty {
    pub fn name(&self) -> String {
        self.erased.property_owner().property
    }

    pub fn owner(&self) -> TaskId {
        self.erased.property_owner().task
    }

    pub fn kind(&self) -> PropertyKind {
        self.erased.kind()
    }

    pub fn finalize(&self) {
        self.erased.finalize()
    }

    pub fn is_finalized(&self) -> bool {
        self.erased.is_finalized()
    }

    /// The erased lineage handle of the property.
    pub fn erased_supplier(&self) -> AnySupplier {
        self.erased.erased_supplier()
    }

    /// The lineage of the property, including itself.
    pub fn lineage(&self) -> Vec<AnySupplier> {
        self.erased.erased_supplier().lineage()
    }

    /// Recover the typed property.
    pub fn as_typed<T: Clone + Send + Sync + 'static>(
        &self,
    ) -> Result<Property<T>, PropertyError> {
        if self.ty != TypeId::of::<T>() {
            return Err(PropertyError::TypeMismatch {
                owner: self.erased.property_owner(),
                expected: std::any::type_name::<T>(),
                found: self.erased.type_name(),
            });
        }
        let typed = self
            .any
            .downcast_ref::<Property<T>>()
            .expect("type id already checked");
        Ok(typed.clone())
    }
}

impl Debug for AnyProperty {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AnyProperty({:?}: {})",
            self.erased.property_owner(),
            self.erased.type_name()
        )
    }
}
