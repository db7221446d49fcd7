//! The boundary between the collector and the runtime's object model.
//!
//! The collector never interprets an object's fields. For a typed allocation
//! it reads the leading [`ObjectHeader`], follows it to the [`ClassObject`]
//! and calls the class's [`TypeOps`]. Auxiliary allocations start with an
//! [`AuxiliaryHeader`] carrying their own visit hook.

use std::fmt;
use std::ptr::NonNull;

use crate::visitor::GcVisitor;

/// Reports an object's outgoing references.
pub type VisitFn = fn(&mut GcVisitor<'_>, NonNull<u8>);

/// Simple destructor run once when an object is reclaimed.
pub type FinalizerFn = fn(NonNull<u8>);

/// Per-type behavior the collector calls into.
pub struct TypeOps {
    /// Type name, for diagnostics.
    pub name: &'static str,
    /// Visit every reference the object holds, including its class pointer.
    pub visit_children: VisitFn,
    /// Run when the object is reclaimed. Must not allocate.
    pub finalizer: Option<FinalizerFn>,
    /// Instances may be targets of weak references.
    pub supports_weakrefs: bool,
    /// Instances are themselves classes and join the live-classes registry.
    pub instances_are_classes: bool,
}

impl fmt::Debug for TypeOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeOps")
            .field("name", &self.name)
            .field("finalizer", &self.finalizer.is_some())
            .field("supports_weakrefs", &self.supports_weakrefs)
            .field("instances_are_classes", &self.instances_are_classes)
            .finish_non_exhaustive()
    }
}

/// First word of every typed object.
///
/// A null class marks an object still under construction; the tracer treats
/// it as opaque.
#[repr(C)]
#[derive(Debug)]
pub struct ObjectHeader {
    /// The object's class.
    pub class: *const ClassObject,
}

/// A class: an object whose header points at its metaclass, followed by the
/// operations shared by its instances.
#[repr(C)]
#[derive(Debug)]
pub struct ClassObject {
    /// Header pointing at the metaclass.
    pub header: ObjectHeader,
    /// Operations for instances of this class.
    pub ops: &'static TypeOps,
}

/// First word of every auxiliary allocation.
#[repr(C)]
pub struct AuxiliaryHeader {
    /// Visit hook; `None` while the metadata is being built.
    pub visit: Option<VisitFn>,
}

impl fmt::Debug for AuxiliaryHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuxiliaryHeader")
            .field("visit", &self.visit.is_some())
            .finish()
    }
}

/// The class pointer stored in a typed object.
///
/// # Safety
///
/// `obj` must point at a readable [`ObjectHeader`].
#[must_use]
pub unsafe fn class_of(obj: NonNull<u8>) -> Option<NonNull<ClassObject>> {
    NonNull::new(unsafe { obj.cast::<ObjectHeader>().as_ref() }.class.cast_mut())
}

/// Operations for a typed object, or `None` while it is under construction.
///
/// # Safety
///
/// `obj` and its class, if set, must be readable.
#[must_use]
pub unsafe fn ops_of(obj: NonNull<u8>) -> Option<&'static TypeOps> {
    let class = unsafe { class_of(obj) }?;
    Some(unsafe { class.as_ref() }.ops)
}

/// Visit the class pointer of a typed object.
///
/// Most `visit_children` implementations start with this.
pub fn visit_class(visitor: &mut GcVisitor<'_>, obj: NonNull<u8>) {
    // SAFETY: only called on typed objects, which begin with a header.
    let class = unsafe { obj.cast::<ObjectHeader>().as_ref() }.class;
    visitor.visit(class);
}

/// Operations for a metaclass whose instances are plain [`ClassObject`]s.
pub static METACLASS_OPS: TypeOps = TypeOps {
    name: "type",
    visit_children: visit_class,
    finalizer: None,
    supports_weakrefs: false,
    instances_are_classes: true,
};

#[cfg(test)]
mod tests {
    use super::*;

    static PLAIN_OPS: TypeOps = TypeOps {
        name: "plain",
        visit_children: visit_class,
        finalizer: None,
        supports_weakrefs: true,
        instances_are_classes: false,
    };

    #[test]
    fn test_class_and_ops_lookup() {
        let class = ClassObject {
            header: ObjectHeader {
                class: std::ptr::null(),
            },
            ops: &PLAIN_OPS,
        };
        let mut obj = ObjectHeader {
            class: std::ptr::null(),
        };
        let obj_ptr = NonNull::from(&mut obj).cast::<u8>();
        assert!(unsafe { ops_of(obj_ptr) }.is_none());

        obj.class = &raw const class;
        let obj_ptr = NonNull::from(&mut obj).cast::<u8>();
        let ops = unsafe { ops_of(obj_ptr) }.unwrap();
        assert_eq!(ops.name, "plain");
        assert!(ops.supports_weakrefs);
        assert!(METACLASS_OPS.instances_are_classes);
    }
}
