//! Marker scanning and substitution.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

use ti_core::{ConfigReader, Error, Result, TypedValue};

use crate::bindings::OutputBindings;
use crate::context::SubstitutionContext;

const MARKER_PATTERN: &str = r"\$\{(in|out|prop|dir|addProp):([^}]*)\}";

/// The five marker families of the template grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerFamily {
    Input,
    Output,
    Property,
    Directory,
    AdditionalProperty,
}

impl MarkerFamily {
    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "in" => Some(Self::Input),
            "out" => Some(Self::Output),
            "prop" => Some(Self::Property),
            "dir" => Some(Self::Directory),
            "addProp" => Some(Self::AdditionalProperty),
            _ => None,
        }
    }
}

/// Well-known sandbox directories addressable through `${dir:KIND}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirKind {
    Config,
    Working,
    Input,
    Tool,
    Output,
}

impl DirKind {
    /// Parse a `${dir:...}` name; `workingDir` is accepted for `working`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "config" => Some(Self::Config),
            "working" | "workingDir" => Some(Self::Working),
            "input" => Some(Self::Input),
            "tool" => Some(Self::Tool),
            "output" => Some(Self::Output),
            _ => None,
        }
    }
}

/// Paths substituted for directory markers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxDirs {
    pub config: PathBuf,
    pub working: PathBuf,
    pub input: PathBuf,
    pub tool: PathBuf,
    pub output: PathBuf,
}

impl SandboxDirs {
    pub fn get(&self, kind: DirKind) -> &Path {
        match kind {
            DirKind::Config => &self.config,
            DirKind::Working => &self.working,
            DirKind::Input => &self.input,
            DirKind::Tool => &self.tool,
            DirKind::Output => &self.output,
        }
    }
}

/// Everything a template may refer to.
pub struct RenderContext<'a> {
    /// Values bound to inputs for the current run.
    pub inputs: &'a BTreeMap<String, TypedValue>,
    /// Sandbox copies of file and directory inputs.
    pub local_paths: &'a BTreeMap<String, PathBuf>,
    pub config: &'a dyn ConfigReader,
    pub dirs: &'a SandboxDirs,
    pub outputs: &'a OutputBindings,
    /// Values known only after part of the run, such as `exitCode`.
    pub additional: &'a BTreeMap<String, String>,
}

/// Renders command and script templates.
#[derive(Debug, Clone)]
pub struct PlaceholderEngine {
    markers: Regex,
}

impl PlaceholderEngine {
    pub fn new() -> Result<Self> {
        let markers = Regex::new(MARKER_PATTERN)
            .map_err(|e| Error::configuration(format!("Invalid marker pattern: {e}")))?;
        Ok(Self { markers })
    }

    /// Substitute every known marker of `template`.
    ///
    /// Scalars are checked against `target` before insertion. Markers that
    /// name nothing known (unbound input, unset property, unknown directory)
    /// are left in place. Substituted text is never scanned again.
    pub fn render(
        &self,
        template: &str,
        ctx: &RenderContext<'_>,
        target: SubstitutionContext,
    ) -> Result<String> {
        let mut rendered = String::with_capacity(template.len());
        let mut last = 0;

        for caps in self.markers.captures_iter(template) {
            let (Some(whole), Some(prefix), Some(name)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            rendered.push_str(&template[last..whole.start()]);
            last = whole.end();

            let Some(family) = MarkerFamily::from_prefix(prefix.as_str()) else {
                rendered.push_str(whole.as_str());
                continue;
            };
            match substitute(family, name.as_str(), ctx, target)? {
                Some(value) => rendered.push_str(&value),
                None => {
                    debug!("Leaving unresolved marker {} in place", whole.as_str());
                    rendered.push_str(whole.as_str());
                }
            }
        }
        rendered.push_str(&template[last..]);
        Ok(rendered)
    }

    /// Names referenced by markers of `family` in `template`.
    pub fn referenced(&self, template: &str, family: MarkerFamily) -> BTreeSet<String> {
        self.markers
            .captures_iter(template)
            .filter(|caps| {
                caps.get(1).and_then(|p| MarkerFamily::from_prefix(p.as_str())) == Some(family)
            })
            .filter_map(|caps| caps.get(2).map(|n| n.as_str().to_string()))
            .collect()
    }
}

fn substitute(
    family: MarkerFamily,
    name: &str,
    ctx: &RenderContext<'_>,
    target: SubstitutionContext,
) -> Result<Option<String>> {
    let value = match family {
        MarkerFamily::Output => ctx.outputs.id_for(name).map(str::to_string),
        MarkerFamily::Input => match ctx.inputs.get(name) {
            None => None,
            Some(value) => Some(input_text(name, value, ctx, target)?),
        },
        MarkerFamily::Property => match ctx.config.property(name) {
            None => None,
            Some(value) => {
                target.check(&value, &format!("property '{name}'"))?;
                Some(value)
            }
        },
        MarkerFamily::Directory => {
            DirKind::parse(name).map(|kind| slash_path(ctx.dirs.get(kind)))
        }
        MarkerFamily::AdditionalProperty => match ctx.additional.get(name) {
            None => None,
            Some(value) => {
                target.check(value, &format!("additional property '{name}'"))?;
                Some(value.clone())
            }
        },
    };
    Ok(value)
}

fn input_text(
    name: &str,
    value: &TypedValue,
    ctx: &RenderContext<'_>,
    target: SubstitutionContext,
) -> Result<String> {
    match value {
        TypedValue::FileReference(path) | TypedValue::DirectoryReference(path) => {
            let local = ctx.local_paths.get(name).unwrap_or(path);
            Ok(local.display().to_string())
        }
        TypedValue::Vector(_) | TypedValue::Matrix(_) => {
            Ok(value.numeric_literal().unwrap_or_default())
        }
        scalar => {
            let text = scalar.scalar_text().unwrap_or_default();
            target.check(&text, &format!("input '{name}'"))?;
            Ok(text)
        }
    }
}

fn slash_path(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ti_core::{DataType, OutputDecl, PropertyValue, ToolConfig};

    struct Fixture {
        inputs: BTreeMap<String, TypedValue>,
        local_paths: BTreeMap<String, PathBuf>,
        config: ToolConfig,
        dirs: SandboxDirs,
        outputs: OutputBindings,
        additional: BTreeMap<String, String>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                inputs: BTreeMap::new(),
                local_paths: BTreeMap::new(),
                config: ToolConfig::default(),
                dirs: SandboxDirs {
                    config: PathBuf::from("/w/Config"),
                    working: PathBuf::from("/w"),
                    input: PathBuf::from("/w/Input"),
                    tool: PathBuf::from("/opt/tool"),
                    output: PathBuf::from("/w/Output"),
                },
                outputs: OutputBindings::new(&[OutputDecl::new("result", DataType::Float)]),
                additional: BTreeMap::new(),
            }
        }

        fn render(&self, template: &str, target: SubstitutionContext) -> Result<String> {
            let ctx = RenderContext {
                inputs: &self.inputs,
                local_paths: &self.local_paths,
                config: &self.config,
                dirs: &self.dirs,
                outputs: &self.outputs,
                additional: &self.additional,
            };
            PlaceholderEngine::new()?.render(template, &ctx, target)
        }
    }

    #[test]
    fn test_directory_markers_and_alias() {
        let fx = Fixture::new();
        let out = fx
            .render(
                "${dir:working} ${dir:workingDir} ${dir:config} ${dir:input} ${dir:output} ${dir:tool}",
                SubstitutionContext::PosixShell,
            )
            .unwrap();
        assert_eq!(out, "/w /w /w/Config /w/Input /w/Output /opt/tool");
    }

    #[test]
    fn test_directory_backslashes_normalized() {
        let mut fx = Fixture::new();
        fx.dirs.working = PathBuf::from("C:\\runs\\tool");
        let out = fx.render("cd ${dir:working}", SubstitutionContext::WindowsBatch).unwrap();
        assert_eq!(out, "cd C:/runs/tool");
    }

    #[test]
    fn test_output_marker_uses_generated_id() {
        let fx = Fixture::new();
        let out = fx.render("${out:result} = 1.5;", SubstitutionContext::Script).unwrap();
        let id = fx.outputs.id_for("result").unwrap();
        assert_eq!(out, format!("{id} = 1.5;"));
    }

    #[test]
    fn test_unknown_markers_left_unchanged() {
        let fx = Fixture::new();
        let template = "${in:nothing} ${prop:unset} ${dir:home} ${out:undeclared} ${foo:bar}";
        let out = fx.render(template, SubstitutionContext::PosixShell).unwrap();
        assert_eq!(out, template);
    }

    #[test]
    fn test_property_validated_only_when_referenced() {
        let mut fx = Fixture::new();
        fx.config.properties.insert("danger".into(), PropertyValue::plain("a;b"));
        fx.config.properties.insert("mode".into(), PropertyValue::plain("fast"));

        let out = fx.render("run --mode=${prop:mode}", SubstitutionContext::PosixShell).unwrap();
        assert_eq!(out, "run --mode=fast");

        let err = fx
            .render("run --x=${prop:danger}", SubstitutionContext::PosixShell)
            .unwrap_err();
        assert_eq!(err.kind(), "SubstitutionSecurityError");
        assert!(err.to_string().contains("property 'danger'"));
    }

    #[test]
    fn test_additional_property_exit_code() {
        let mut fx = Fixture::new();
        fx.additional.insert("exitCode".into(), "3".into());
        let out = fx.render("let rc = ${addProp:exitCode};", SubstitutionContext::Script).unwrap();
        assert_eq!(out, "let rc = 3;");
    }

    #[test]
    fn test_file_input_uses_local_copy() {
        let mut fx = Fixture::new();
        fx.inputs.insert(
            "mesh".into(),
            TypedValue::FileReference(PathBuf::from("/data/with space/mesh.dat")),
        );
        fx.local_paths.insert("mesh".into(), PathBuf::from("/w/Input/mesh/mesh.dat"));
        let out = fx.render("solve ${in:mesh}", SubstitutionContext::PosixShell).unwrap();
        assert_eq!(out, "solve /w/Input/mesh/mesh.dat");
    }

    #[test]
    fn test_substituted_text_is_not_rescanned() {
        let mut fx = Fixture::new();
        fx.inputs.insert("a".into(), TypedValue::ShortText("{in:b}".into()));
        fx.inputs.insert("b".into(), TypedValue::ShortText("x".into()));
        let out = fx.render("$${in:a}", SubstitutionContext::WindowsBatch).unwrap();
        assert_eq!(out, "${in:b}");
    }

    #[test]
    fn test_referenced_names() {
        let engine = PlaceholderEngine::new().unwrap();
        let names = engine.referenced("${in:a} ${prop:p} ${in:b} ${in:a}", MarkerFamily::Input);
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
