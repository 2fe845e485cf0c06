//! Named get/set bindings on entity fields.

use std::fmt;

enum Access<E, T> {
    Field {
        get: fn(&E) -> &T,
        get_mut: fn(&mut E) -> &mut T,
    },
    Property {
        get: fn(&E) -> T,
        set: fn(&mut E, T),
    },
}

/// Reads and writes one value of an entity.
///
/// A field accessor borrows the value in place; a property accessor goes
/// through a getter/setter pair, for values that are computed or stored in
/// another shape.
///
/// ```
/// use relmap::Accessor;
///
/// #[derive(Default)]
/// struct User {
///     name: String,
///     age: u8,
/// }
///
/// let name = Accessor::field(|u: &User| &u.name, |u: &mut User| &mut u.name);
/// let age = Accessor::property(|u: &User| u32::from(u.age), |u: &mut User, v: u32| {
///     u.age = u8::try_from(v).unwrap_or(u8::MAX);
/// });
///
/// let mut user = User::default();
/// name.set(&mut user, "Ann".to_string());
/// age.set(&mut user, 300);
/// assert_eq!(name.get(&user), "Ann");
/// assert_eq!(user.age, 255);
/// ```
pub struct Accessor<E, T> {
    access: Access<E, T>,
}

impl<E, T> Accessor<E, T> {
    /// Direct access to a field.
    pub fn field(get: fn(&E) -> &T, get_mut: fn(&mut E) -> &mut T) -> Self {
        Self {
            access: Access::Field { get, get_mut },
        }
    }

    /// Access through a getter and a setter.
    pub fn property(get: fn(&E) -> T, set: fn(&mut E, T)) -> Self {
        Self {
            access: Access::Property { get, set },
        }
    }

    pub fn set(&self, entity: &mut E, value: T) {
        match &self.access {
            Access::Field { get_mut, .. } => *get_mut(entity) = value,
            Access::Property { set, .. } => set(entity, value),
        }
    }

    /// Run `f` on the current value without cloning field values.
    pub fn with<R>(&self, entity: &E, f: impl FnOnce(&T) -> R) -> R {
        match &self.access {
            Access::Field { get, .. } => f(get(entity)),
            Access::Property { get, .. } => f(&get(entity)),
        }
    }

    /// Modify the value in place; properties are read, changed and written back.
    pub fn update<R>(&self, entity: &mut E, f: impl FnOnce(&mut T) -> R) -> R {
        match &self.access {
            Access::Field { get_mut, .. } => f(get_mut(entity)),
            Access::Property { get, set } => {
                let mut value = get(entity);
                let result = f(&mut value);
                set(entity, value);
                result
            }
        }
    }
}

impl<E, T: Clone> Accessor<E, T> {
    pub fn get(&self, entity: &E) -> T {
        self.with(entity, T::clone)
    }
}

impl<E, T: Default> Accessor<E, T> {
    /// Move the value out, leaving the default behind.
    pub fn take(&self, entity: &mut E) -> T {
        self.update(entity, std::mem::take)
    }
}

impl<E, T> Clone for Accessor<E, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E, T> Copy for Accessor<E, T> {}

impl<E, T> Clone for Access<E, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E, T> Copy for Access<E, T> {}

impl<E, T> fmt::Debug for Accessor<E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.access {
            Access::Field { .. } => "field",
            Access::Property { .. } => "property",
        };
        f.debug_struct("Accessor").field("kind", &kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Item {
        label: String,
        cents: i64,
    }

    #[test]
    fn test_field_accessor_reads_in_place() {
        let label = Accessor::field(|i: &Item| &i.label, |i: &mut Item| &mut i.label);
        let mut item = Item::default();
        label.set(&mut item, "lamp".to_string());
        assert_eq!(label.with(&item, String::len), 4);
        label.update(&mut item, |l| l.push('s'));
        assert_eq!(item.label, "lamps");
        assert_eq!(label.take(&mut item), "lamps");
        assert!(item.label.is_empty());
    }

    #[test]
    fn test_property_accessor_round_trips_through_setter() {
        let price = Accessor::property(
            |i: &Item| i.cents as f64 / 100.0,
            |i: &mut Item, v: f64| i.cents = (v * 100.0).round() as i64,
        );
        let mut item = Item::default();
        price.set(&mut item, 2.5);
        assert_eq!(item.cents, 250);
        price.update(&mut item, |p| *p += 1.0);
        assert_eq!(item.cents, 350);
        assert!((price.get(&item) - 3.5).abs() < f64::EPSILON);
    }
}
