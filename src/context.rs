use std::any::Any;
use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;

/// Field declared by the class under analysis.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FieldInfo {
    pub name: String,
    pub desc: String,
}

/// Class-scoped state private to each filter, keyed by filter id.
///
/// Access is serialized so methods of one class may be filtered from several threads.
#[derive(Default)]
pub struct Scratch {
    entries: Mutex<HashMap<&'static str, Box<dyn Any + Send>>>,
}

impl Scratch {
    /// Returns the cached value for `key`, computing it on first use.
    ///
    /// The lock is held while `init` runs so concurrent callers compute it once.
    pub fn get_or_try_insert_with<T, E>(
        &self,
        key: &'static str,
        init: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E>
    where
        T: Any + Send + Clone,
    {
        let mut entries = self.entries.lock();
        if let Some(value) = entries.get(key).and_then(|value| value.downcast_ref::<T>()) {
            return Ok(value.clone());
        }
        let value = init()?;
        entries.insert(key, Box::new(value.clone()));
        Ok(value)
    }

    /// Runs `update` on the entry for `key`, starting from `T::default()`.
    pub fn update<T, R>(&self, key: &'static str, update: impl FnOnce(&mut T) -> R) -> R
    where
        T: Any + Send + Default,
    {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key).or_insert_with(|| Box::new(T::default()));
        if !entry.is::<T>() {
            *entry = Box::new(T::default());
        }
        match entry.downcast_mut::<T>() {
            Some(value) => update(value),
            None => update(&mut T::default()),
        }
    }

    pub fn get<T: Any + Send + Clone>(&self, key: &'static str) -> Option<T> {
        self.entries
            .lock()
            .get(key)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }
}

impl std::fmt::Debug for Scratch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: BTreeSet<&'static str> = self.entries.lock().keys().copied().collect();
        f.debug_struct("Scratch").field("keys", &keys).finish()
    }
}

/// Facts about the class whose methods are being filtered.
///
/// Built once per class before any method is filtered and dropped afterwards.
#[derive(Debug, Default)]
pub struct FilterContext {
    pub(crate) class_name: String,
    pub(crate) super_class_name: Option<String>,
    pub(crate) interfaces: BTreeSet<String>,
    pub(crate) class_annotations: BTreeSet<String>,
    pub(crate) class_attributes: BTreeSet<String>,
    pub(crate) fields: Vec<FieldInfo>,
    pub(crate) source_file_name: Option<String>,
    pub(crate) source_debug_extension: Option<String>,
    pub(crate) scratch: Scratch,
}

impl FilterContext {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            ..Self::default()
        }
    }

    pub fn with_super_class(mut self, name: impl Into<String>) -> Self {
        self.super_class_name = Some(name.into());
        self
    }

    pub fn with_interface(mut self, name: impl Into<String>) -> Self {
        self.interfaces.insert(name.into());
        self
    }

    pub fn with_class_annotation(mut self, desc: impl Into<String>) -> Self {
        self.class_annotations.insert(desc.into());
        self
    }

    pub fn with_class_attribute(mut self, name: impl Into<String>) -> Self {
        self.class_attributes.insert(name.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, desc: impl Into<String>) -> Self {
        self.fields.push(FieldInfo {
            name: name.into(),
            desc: desc.into(),
        });
        self
    }

    pub fn with_source_file_name(mut self, name: impl Into<String>) -> Self {
        self.source_file_name = Some(name.into());
        self
    }

    pub fn with_source_debug_extension(mut self, smap: impl Into<String>) -> Self {
        self.source_debug_extension = Some(smap.into());
        self
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn super_class_name(&self) -> Option<&str> {
        self.super_class_name.as_deref()
    }

    pub fn interfaces(&self) -> &BTreeSet<String> {
        &self.interfaces
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn source_file_name(&self) -> Option<&str> {
        self.source_file_name.as_deref()
    }

    pub fn source_debug_extension(&self) -> Option<&str> {
        self.source_debug_extension.as_deref()
    }

    pub fn has_class_annotation(&self, desc: &str) -> bool {
        self.class_annotations.contains(desc)
    }

    pub fn has_class_attribute(&self, name: &str) -> bool {
        self.class_attributes.contains(name)
    }

    pub fn scratch(&self) -> &Scratch {
        &self.scratch
    }
}
