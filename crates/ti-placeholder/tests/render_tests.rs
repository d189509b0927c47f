//! Rendering behaviour across substitution contexts.

use std::collections::BTreeMap;
use std::path::PathBuf;

use ti_core::{Error, ToolConfig, TypedValue};
use ti_placeholder::{
    OutputBindings, PlaceholderEngine, RenderContext, SandboxDirs, SubstitutionContext,
};

const CONTEXTS: [SubstitutionContext; 3] = [
    SubstitutionContext::PosixShell,
    SubstitutionContext::WindowsBatch,
    SubstitutionContext::Script,
];

fn render_input(
    name: &str,
    value: TypedValue,
    template: &str,
    target: SubstitutionContext,
) -> ti_core::Result<String> {
    let mut inputs = BTreeMap::new();
    inputs.insert(name.to_string(), value);
    let local_paths = BTreeMap::new();
    let config = ToolConfig::default();
    let dirs = SandboxDirs::default();
    let outputs = OutputBindings::default();
    let additional = BTreeMap::new();
    let ctx = RenderContext {
        inputs: &inputs,
        local_paths: &local_paths,
        config: &config,
        dirs: &dirs,
        outputs: &outputs,
        additional: &additional,
    };
    PlaceholderEngine::new()?.render(template, &ctx, target)
}

#[test]
fn safe_scalars_round_trip_verbatim() {
    let samples = [
        "bob",
        "hello world",
        "a-b_c.d/e:f",
        "42",
        "x=y,z",
        "ünïcödé",
        "tab\there",
        "",
    ];
    for context in CONTEXTS {
        for sample in samples {
            if context.first_unsafe(sample).is_some() {
                continue;
            }
            let out = render_input(
                "v",
                TypedValue::ShortText(sample.to_string()),
                "pre ${in:v} post",
                context,
            )
            .unwrap();
            assert_eq!(out, format!("pre {sample} post"), "context {context}");
        }
    }
}

#[test]
fn every_unsafe_char_is_rejected() {
    for context in CONTEXTS {
        for &c in context.unsafe_chars() {
            let value = format!("a{c}b");
            let err = render_input("v", TypedValue::ShortText(value), "run ${in:v}", context)
                .unwrap_err();
            match err {
                Error::SubstitutionSecurity { offending, .. } => assert_eq!(offending, c),
                other => panic!("unexpected error for {c:?} in {context}: {other:?}"),
            }
        }
    }
}

#[test]
fn shell_injection_in_username_is_rejected() {
    let err = render_input(
        "username",
        TypedValue::ShortText("bob; rm -rf /".to_string()),
        "run.sh --name=${in:username}",
        SubstitutionContext::PosixShell,
    )
    .unwrap_err();
    assert_eq!(err.kind(), "SubstitutionSecurityError");
    assert!(err.to_string().contains("input 'username'"));
}

#[test]
fn numeric_scalars_render_as_text() {
    let out = render_input(
        "n",
        TypedValue::Integer(-12),
        "--n=${in:n}",
        SubstitutionContext::PosixShell,
    )
    .unwrap();
    assert_eq!(out, "--n=-12");

    let out = render_input(
        "f",
        TypedValue::Float(0.5),
        "--f=${in:f}",
        SubstitutionContext::WindowsBatch,
    )
    .unwrap();
    assert_eq!(out, "--f=0.5");

    let out = render_input(
        "b",
        TypedValue::Boolean(false),
        "flag = ${in:b};",
        SubstitutionContext::Script,
    )
    .unwrap();
    assert_eq!(out, "flag = false;");
}

#[test]
fn vectors_and_matrices_render_as_bracketed_lists() {
    let out = render_input(
        "v",
        TypedValue::Vector(vec![1.0, 2.5, -3.0]),
        "let v = ${in:v};",
        SubstitutionContext::Script,
    )
    .unwrap();
    assert_eq!(out, "let v = [1.0,2.5,-3.0];");

    let out = render_input(
        "m",
        TypedValue::Matrix(vec![vec![1.0, 0.0], vec![0.0, 1.0]]),
        "solve ${in:m}",
        SubstitutionContext::PosixShell,
    )
    .unwrap();
    assert_eq!(out, "solve [[1.0,0.0],[0.0,1.0]]");
}

#[test]
fn directory_input_without_local_copy_uses_bound_path() {
    let out = render_input(
        "d",
        TypedValue::DirectoryReference(PathBuf::from("/data/set")),
        "ls ${in:d}",
        SubstitutionContext::PosixShell,
    )
    .unwrap();
    assert_eq!(out, "ls /data/set");
}
