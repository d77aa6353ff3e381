use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::context::FilterContext;
use crate::filters::{Filter, FilterMetadata, builtin_filters};
use crate::ir::Method;
use crate::output::{FilterOutput, MethodReport};

/// Resource listing extension filter names, relative to the extension root.
pub const DEFAULT_EXTENSION_RESOURCE: &str = "META-INF/services/covfilter.filters.Filter";

/// Extension configuration that cannot be honored.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("illegal filter name on line {line}: {name}")]
    IllegalName { line: usize, name: String },
    #[error("unknown filter: {0}")]
    UnknownFilter(String),
    #[error("filter {name} cannot be constructed: {message}")]
    Construction { name: String, message: String },
    #[error("filter configuration must be a JSON object, found {0}")]
    NotAnObject(&'static str),
    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Pipeline settings, usually deserialized from the caller's configuration file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Directory the extension resource is looked up in. `None` disables extensions.
    pub extension_root: Option<PathBuf>,
    pub extension_resource: String,
    /// Ids of built-in filters to leave out.
    pub disabled_filters: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            extension_root: None,
            extension_resource: DEFAULT_EXTENSION_RESOURCE.to_string(),
            disabled_filters: Vec::new(),
        }
    }
}

impl FilterConfig {
    /// Reads a JSON object; absent keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(json).context("failed to parse filter configuration")?;
        if !value.is_object() {
            return Err(ConfigError::NotAnObject(json_kind(&value)).into());
        }
        serde_json::from_value(value).context("failed to parse filter configuration")
    }

    fn extension_path(&self) -> Option<PathBuf> {
        self.extension_root
            .as_ref()
            .map(|root| root.join(&self.extension_resource))
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Builds one extension filter instance.
pub type FilterConstructor = fn() -> std::result::Result<Box<dyn Filter>, String>;

/// Extension filters the program knows how to build, by fully qualified name.
#[derive(Clone, Debug, Default)]
pub struct ExtensionCatalog {
    constructors: BTreeMap<String, FilterConstructor>,
}

impl ExtensionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, constructor: FilterConstructor) -> Self {
        self.constructors.insert(name.into(), constructor);
        self
    }

    fn construct(&self, name: &str) -> std::result::Result<Box<dyn Filter>, ConfigError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| ConfigError::UnknownFilter(name.to_string()))?;
        constructor().map_err(|message| ConfigError::Construction {
            name: name.to_string(),
            message,
        })
    }
}

/// Parses an extension list: one name per line, `#` starts a comment,
/// blank lines are skipped and repeated names are kept once.
pub fn parse_extension_list(text: &str) -> std::result::Result<Vec<String>, ConfigError> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let name = line.split('#').next().unwrap_or_default().trim();
        if name.is_empty() {
            continue;
        }
        if !is_qualified_name(name) {
            return Err(ConfigError::IllegalName {
                line: index + 1,
                name: name.to_string(),
            });
        }
        trace!(name, "extension filter listed");
        if seen.insert(name) {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

fn is_qualified_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.')
}

fn load_extensions(
    path: &Path,
    catalog: &ExtensionCatalog,
) -> std::result::Result<Vec<Box<dyn Filter>>, ConfigError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no extension list");
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let filters = parse_extension_list(&text)?
        .iter()
        .map(|name| catalog.construct(name))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    debug!(path = %path.display(), count = filters.len(), "loaded extension filters");
    Ok(filters)
}

type Loaded = Arc<Vec<Box<dyn Filter>>>;

/// Runs the filters named in the extension list, loaded on first use.
pub struct ExtensionFilter {
    path: Option<PathBuf>,
    catalog: ExtensionCatalog,
    loaded: Mutex<Option<Loaded>>,
}

impl ExtensionFilter {
    pub fn new(config: &FilterConfig, catalog: ExtensionCatalog) -> Self {
        Self {
            path: config.extension_path(),
            catalog,
            loaded: Mutex::new(None),
        }
    }

    /// Discovered filters, reading the extension list when nothing is cached.
    pub fn filters(&self) -> std::result::Result<Loaded, ConfigError> {
        let mut loaded = self.loaded.lock();
        if let Some(filters) = loaded.as_ref() {
            return Ok(Arc::clone(filters));
        }
        let filters = match &self.path {
            Some(path) => load_extensions(path, &self.catalog)?,
            None => Vec::new(),
        };
        let filters = Arc::new(filters);
        *loaded = Some(Arc::clone(&filters));
        Ok(filters)
    }

    /// Drops the cached list so the next use reads the resource again.
    pub fn reset(&self) {
        debug!("extension filter cache reset");
        *self.loaded.lock() = None;
    }
}

impl Filter for ExtensionFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            id: "EXTENSIONS",
            name: "Extension filters",
            description: "Filters discovered from the extension list",
        }
    }

    fn filter(
        &self,
        method: &Method,
        context: &FilterContext,
        output: &mut dyn FilterOutput,
    ) -> Result<()> {
        for filter in self.filters()?.iter() {
            let id = filter.metadata().id;
            trace!(filter = id, method = %method.name, "running extension filter");
            filter
                .filter(method, context, output)
                .with_context(|| format!("extension filter {id} failed"))?;
        }
        Ok(())
    }
}

/// A class ready for filtering: its context and decoded methods.
#[derive(Debug)]
pub struct ClassUnit {
    pub context: FilterContext,
    pub methods: Vec<Method>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MethodResult {
    pub name: String,
    pub desc: String,
    pub report: MethodReport,
}

/// Filter output for every method of one class.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClassReport {
    pub class_name: String,
    pub methods: Vec<MethodResult>,
}

impl ClassReport {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .with_context(|| format!("failed to serialize report of {}", self.class_name))
    }
}

/// Ordered filter pipeline: the built-in filters followed by the extension filter.
pub struct FilterRegistry {
    filters: Vec<Box<dyn Filter>>,
    extensions: Arc<ExtensionFilter>,
}

impl FilterRegistry {
    pub fn new(
        config: &FilterConfig,
        catalog: ExtensionCatalog,
    ) -> std::result::Result<Self, ConfigError> {
        let builtin = builtin_filters();
        if let Some(unknown) = config
            .disabled_filters
            .iter()
            .find(|id| !builtin.iter().any(|filter| filter.metadata().id == id.as_str()))
        {
            return Err(ConfigError::UnknownFilter(unknown.clone()));
        }
        let filters = builtin
            .into_iter()
            .filter(|filter| {
                let id = filter.metadata().id;
                !config.disabled_filters.iter().any(|disabled| disabled == id)
            })
            .collect();
        Ok(Self {
            filters,
            extensions: Arc::new(ExtensionFilter::new(config, catalog)),
        })
    }

    /// Built-in filters only.
    pub fn builtin() -> Self {
        Self {
            filters: builtin_filters(),
            extensions: Arc::new(ExtensionFilter::new(
                &FilterConfig::default(),
                ExtensionCatalog::new(),
            )),
        }
    }

    /// Metadata of every filter in pipeline order.
    pub fn metadata(&self) -> Vec<FilterMetadata> {
        self.pipeline().map(|filter| filter.metadata()).collect()
    }

    pub fn extensions(&self) -> &ExtensionFilter {
        &self.extensions
    }

    pub fn reset(&self) {
        self.extensions.reset();
    }

    fn pipeline(&self) -> impl Iterator<Item = &dyn Filter> {
        self.filters
            .iter()
            .map(|filter| filter.as_ref())
            .chain(std::iter::once(self.extensions.as_ref() as &dyn Filter))
    }

    /// Runs every filter once over `method`.
    pub fn filter_method(&self, method: &Method, context: &FilterContext) -> Result<MethodReport> {
        let mut report = MethodReport::default();
        for filter in self.pipeline() {
            let id = filter.metadata().id;
            trace!(filter = id, method = %method.name, "running filter");
            filter.filter(method, context, &mut report).with_context(|| {
                format!(
                    "filter {id} failed on {}.{}{}",
                    context.class_name(),
                    method.name,
                    method.desc
                )
            })?;
        }
        debug!(
            class = context.class_name(),
            method = %method.name,
            ignored = report.ignored.len(),
            merged = report.merged.len(),
            replacements = report.replacements.len(),
            "filtered method"
        );
        Ok(report)
    }

    /// Filters the methods of one class in order.
    pub fn analyze_class(&self, class: &ClassUnit) -> Result<ClassReport> {
        let class_name = class.context.class_name();
        let methods = class
            .methods
            .iter()
            .map(|method| {
                Ok(MethodResult {
                    name: method.name.clone(),
                    desc: method.desc.clone(),
                    report: self.filter_method(method, &class.context)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(class = class_name, methods = methods.len(), "analyzed class");
        Ok(ClassReport {
            class_name: class_name.to_string(),
            methods,
        })
    }

    /// Filters many classes in parallel. Reports keep the input order.
    pub fn analyze_classes(&self, classes: &[ClassUnit]) -> Result<Vec<ClassReport>> {
        classes
            .par_iter()
            .map(|class| self.analyze_class(class))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MethodBuilder;
    use crate::filters::testing::java_context;
    use crate::ir::MethodAccess;
    use crate::opcodes::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    /// Ignores the first instruction of every method.
    struct MarkFirst;

    impl Filter for MarkFirst {
        fn metadata(&self) -> FilterMetadata {
            FilterMetadata {
                id: "MARK_FIRST",
                name: "Mark first",
                description: "Ignores the first instruction",
            }
        }

        fn filter(
            &self,
            _method: &Method,
            _context: &FilterContext,
            output: &mut dyn FilterOutput,
        ) -> Result<()> {
            output.ignore(0, 0);
            Ok(())
        }
    }

    fn mark_first() -> std::result::Result<Box<dyn Filter>, String> {
        Ok(Box::new(MarkFirst))
    }

    fn no_default() -> std::result::Result<Box<dyn Filter>, String> {
        Err("no default constructor".to_string())
    }

    fn catalog() -> ExtensionCatalog {
        ExtensionCatalog::new()
            .register("com.example.MarkFirst", mark_first)
            .register("com.example.NoDefault", no_default)
    }

    fn config_with(lines: &str) -> (TempDir, FilterConfig) {
        let root = tempfile::tempdir().expect("temp dir");
        write_list(root.path(), lines);
        let config = FilterConfig {
            extension_root: Some(root.path().to_path_buf()),
            ..FilterConfig::default()
        };
        (root, config)
    }

    fn write_list(root: &Path, lines: &str) {
        let path = root.join(DEFAULT_EXTENSION_RESOURCE);
        fs::create_dir_all(path.parent().expect("resource dir")).expect("create dirs");
        fs::write(path, lines).expect("write extension list");
    }

    fn plain_method() -> Method {
        let mut b = MethodBuilder::new("foo", "()V").with_access(MethodAccess::PUBLIC);
        b.visit_insn(NOP);
        b.visit_insn(RETURN);
        b.build().expect("build method")
    }

    #[test]
    fn discovers_and_invokes_listed_filter() {
        let (_root, config) = config_with("\n# comment only\ncom.example.MarkFirst\n");
        let registry = FilterRegistry::new(&config, catalog()).expect("registry");

        let report = registry
            .filter_method(&plain_method(), &java_context())
            .expect("filter method");

        assert_eq!(1, registry.extensions().filters().expect("extensions").len());
        assert_eq!(vec![(0, 0)], crate::filters::testing::ranges(&report));
    }

    #[test]
    fn end_of_line_comments_and_duplicates() {
        let names = parse_extension_list(
            "com.example.MarkFirst # first\n  com.example.MarkFirst\n#com.example.Other\n",
        )
        .expect("parse list");
        assert_eq!(vec!["com.example.MarkFirst".to_string()], names);
    }

    #[test]
    fn illegal_names_fail_with_line() {
        let error = parse_extension_list("\n1com.example.MarkFirst\n").expect_err("illegal start");
        assert!(matches!(error, ConfigError::IllegalName { line: 2, .. }));

        let error = parse_extension_list("com.example.Mark-First").expect_err("illegal part");
        assert!(matches!(error, ConfigError::IllegalName { line: 1, .. }));
    }

    #[test]
    fn missing_resource_means_no_extensions() {
        let root = tempfile::tempdir().expect("temp dir");
        let config = FilterConfig {
            extension_root: Some(root.path().to_path_buf()),
            ..FilterConfig::default()
        };
        let registry = FilterRegistry::new(&config, catalog()).expect("registry");
        let report = registry
            .filter_method(&plain_method(), &java_context())
            .expect("filter method");
        assert!(report.is_empty());
    }

    #[test]
    fn unknown_and_unconstructable_filters_are_fatal() {
        for (line, expected) in [
            ("com.example.Missing", "unknown filter: com.example.Missing"),
            (
                "com.example.NoDefault",
                "filter com.example.NoDefault cannot be constructed: no default constructor",
            ),
        ] {
            let (_root, config) = config_with(line);
            let registry = FilterRegistry::new(&config, catalog()).expect("registry");
            let error = registry
                .filter_method(&plain_method(), &java_context())
                .expect_err("configuration error");
            let config_error = error.downcast_ref::<ConfigError>().expect("config error");
            assert_eq!(expected, config_error.to_string());
        }
    }

    #[test]
    fn reset_rereads_the_resource() {
        let (root, config) = config_with("com.example.MarkFirst\n");
        let extensions = ExtensionFilter::new(&config, catalog());
        assert_eq!(1, extensions.filters().expect("load").len());

        write_list(root.path(), "# nothing\n");
        assert_eq!(1, extensions.filters().expect("cached").len());

        extensions.reset();
        assert_eq!(0, extensions.filters().expect("reload").len());
    }

    #[test]
    fn disabled_filters_are_left_out() {
        let mut b = MethodBuilder::new("access$000", "()V")
            .with_access(MethodAccess::STATIC | MethodAccess::SYNTHETIC);
        b.visit_insn(RETURN);
        let method = b.build().expect("build method");

        let registry = FilterRegistry::builtin();
        let report = registry.filter_method(&method, &java_context()).expect("filter");
        assert!(!report.is_empty());

        let config = FilterConfig {
            disabled_filters: vec!["SYNTHETIC".to_string()],
            ..FilterConfig::default()
        };
        let registry = FilterRegistry::new(&config, ExtensionCatalog::new()).expect("registry");
        assert!(!registry.metadata().iter().any(|metadata| metadata.id == "SYNTHETIC"));
        let report = registry.filter_method(&method, &java_context()).expect("filter");
        assert!(report.is_empty());

        let config = FilterConfig {
            disabled_filters: vec!["NO_SUCH_FILTER".to_string()],
            ..FilterConfig::default()
        };
        assert!(matches!(
            FilterRegistry::new(&config, ExtensionCatalog::new()),
            Err(ConfigError::UnknownFilter(id)) if id == "NO_SUCH_FILTER"
        ));
    }

    #[test]
    fn config_from_json_uses_defaults() {
        let config = FilterConfig::from_json(r#"{"disabled_filters": ["ASSERT"]}"#)
            .expect("parse config");
        assert_eq!(None, config.extension_root);
        assert_eq!(DEFAULT_EXTENSION_RESOURCE, config.extension_resource);
        assert_eq!(vec!["ASSERT".to_string()], config.disabled_filters);

        let error = FilterConfig::from_json("[]").expect_err("array is not a config");
        assert!(matches!(
            error.downcast_ref::<ConfigError>(),
            Some(ConfigError::NotAnObject("an array"))
        ));
        assert_eq!(
            "filter configuration must be a JSON object, found an array",
            error.to_string()
        );
        assert!(FilterConfig::from_json("null").is_err());
        assert!(FilterConfig::from_json("{\"disabled_filters\": 3}").is_err());
    }

    #[test]
    fn analyzes_classes_in_input_order() {
        let classes: Vec<ClassUnit> = ["Alpha", "Beta", "Gamma"]
            .into_iter()
            .map(|name| ClassUnit {
                context: FilterContext::new(name).with_super_class("java/lang/Object"),
                methods: vec![plain_method()],
            })
            .collect();

        let reports = FilterRegistry::builtin()
            .analyze_classes(&classes)
            .expect("analyze");

        let names: Vec<&str> = reports.iter().map(|report| report.class_name.as_str()).collect();
        assert_eq!(vec!["Alpha", "Beta", "Gamma"], names);
        let json = reports[1].to_json().expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!("Beta", value["class_name"]);
        assert_eq!("foo", value["methods"][0]["name"]);
    }

    proptest! {
        #[test]
        fn qualified_names_are_accepted(
            name in "[a-zA-Z_$][a-zA-Z0-9_$]{0,8}(\\.[a-zA-Z_$][a-zA-Z0-9_$]{0,8}){0,3}"
        ) {
            let names = parse_extension_list(&format!("{name} # trailing\n")).expect("valid name");
            prop_assert_eq!(vec![name], names);
        }

        #[test]
        fn names_starting_with_a_digit_are_rejected(name in "[0-9][a-zA-Z0-9_.]{0,12}") {
            let rejected = matches!(
                parse_extension_list(&name),
                Err(ConfigError::IllegalName { line: 1, .. })
            );
            prop_assert!(rejected);
        }
    }
}
