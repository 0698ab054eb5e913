// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! `include`/`use` libraries through the import resolvers

use anyhow::Result;
use polyframe_script::io::ImportError;
use polyframe_script::{
    run_program, EngineConfig, Error, EvalErrorKind, FsResolver, GeometryProgram, MemoryResolver,
    RecordingBackend, RunOptions,
};
use tempfile::TempDir;

fn run_with(source: &str, options: &RunOptions) -> Result<(GeometryProgram, RecordingBackend), Error> {
    let mut backend = RecordingBackend::new();
    let program = run_program(source, &mut backend, options)?;
    Ok((program, backend))
}

fn import_error(result: Result<(GeometryProgram, RecordingBackend), Error>) -> ImportError {
    match result {
        Err(Error::Eval(e)) => match e.kind {
            EvalErrorKind::ImportError(import) => import,
            other => panic!("expected an import error, got {:?}", other),
        },
        Err(other) => panic!("expected an evaluation error, got {:?}", other),
        Ok(_) => panic!("expected an import error, got success"),
    }
}

fn shapes_library() -> MemoryResolver {
    MemoryResolver::new().with_file(
        "shapes.scad",
        r#"
        module peg(h = 2) cylinder(h = h, r = 1);
        function area(r) = r * r;
        size = 7;
        function sized() = size;
        cube(99);
        echo("library body");
        "#,
    )
}

#[test]
fn test_use_imports_declarations_only() -> Result<()> {
    let options = RunOptions::new().with_import_resolver(shapes_library());
    let (program, backend) = run_with(
        "use <shapes.scad>\npeg();\necho(area(3), sized(), size);",
        &options,
    )?;

    // Only the peg is built, and the library's own statements never run
    assert_eq!(program.roots.len(), 1);
    assert_eq!(backend.primitives().len(), 1);
    assert_eq!(backend.primitives()[0].kind(), "cylinder");
    assert_eq!(program.echoes, vec!["9, 7, undef"]);
    Ok(())
}

#[test]
fn test_include_runs_library_in_place() -> Result<()> {
    let resolver = MemoryResolver::new().with_file(
        "defs.scad",
        "width = 4;\nmodule slab() cube([width, width, 1]);\nslab();",
    );
    let options = RunOptions::new().with_import_resolver(resolver);
    let (program, backend) = run_with("include <defs.scad>\necho(width);\nslab();", &options)?;

    assert_eq!(program.echoes, vec!["4"]);
    assert_eq!(program.roots.len(), 2);
    assert_eq!(backend.primitives().len(), 2);
    Ok(())
}

#[test]
fn test_use_inside_a_module_body() -> Result<()> {
    let options = RunOptions::new().with_import_resolver(shapes_library());
    let (program, _) = run_with(
        "module holder() { use <shapes.scad>\n peg(h = 5); }\nholder();",
        &options,
    )?;
    assert_eq!(program.roots.len(), 1);
    Ok(())
}

#[test]
fn test_mutual_use_is_not_a_cycle() -> Result<()> {
    let resolver = MemoryResolver::new()
        .with_file("a.scad", "use <b.scad>\nfunction fa() = fb() + 1;")
        .with_file("b.scad", "use <a.scad>\nfunction fb() = 1;\nfunction fb2() = fa() * 2;");
    let options = RunOptions::new().with_import_resolver(resolver);
    let (program, _) = run_with("use <a.scad>\nuse <b.scad>\necho(fa(), fb2());", &options)?;

    assert_eq!(program.echoes, vec!["2, 4"]);
    Ok(())
}

#[test]
fn test_include_cycle_is_an_error() {
    let resolver = MemoryResolver::new()
        .with_file("a.scad", "include <b.scad>")
        .with_file("b.scad", "include <a.scad>");
    let options = RunOptions::new().with_import_resolver(resolver);

    let error = import_error(run_with("include <a.scad>", &options));
    assert_eq!(error, ImportError::Cycle("a.scad".to_string()));
}

#[test]
fn test_missing_library_and_resolver() {
    let options = RunOptions::new().with_import_resolver(MemoryResolver::new());
    assert_eq!(
        import_error(run_with("use <nowhere.scad>", &options)),
        ImportError::NotFound("nowhere.scad".to_string())
    );

    assert_eq!(
        import_error(run_with("include <lib.scad>", &RunOptions::default())),
        ImportError::NoResolver("lib.scad".to_string())
    );
}

#[test]
fn test_library_parse_error_names_file() {
    let resolver = MemoryResolver::new().with_file("broken.scad", "module broken( {");
    let options = RunOptions::new().with_import_resolver(resolver);

    match import_error(run_with("use <broken.scad>", &options)) {
        ImportError::Invalid { path, .. } => assert_eq!(path, "broken.scad"),
        other => panic!("expected an invalid library, got {:?}", other),
    }
}

#[test]
fn test_fs_resolver_uses_search_dirs() -> Result<()> {
    let dir = TempDir::new()?;
    std::fs::create_dir(dir.path().join("lib"))?;
    std::fs::write(
        dir.path().join("lib").join("bolt.scad"),
        "module bolt(l = 10) cylinder(h = l, d = 3);",
    )?;

    let options = RunOptions::new()
        .with_import_resolver(FsResolver::new())
        .with_search_dir(dir.path());
    let (program, backend) = run_with("use <lib/bolt.scad>\nbolt(l = 4);", &options)?;

    assert_eq!(program.roots.len(), 1);
    assert_eq!(backend.primitives()[0].kind(), "cylinder");
    Ok(())
}

#[test]
fn test_fs_resolver_sandbox() -> Result<()> {
    let dir = TempDir::new()?;
    let inner = dir.path().join("project");
    std::fs::create_dir(&inner)?;
    std::fs::write(dir.path().join("secret.scad"), "x = 1;")?;
    std::fs::write(inner.join("notes.txt"), "x = 1;")?;

    let options = RunOptions::new()
        .with_import_resolver(FsResolver::new())
        .with_search_dir(&inner);

    assert!(matches!(
        import_error(run_with("use <../secret.scad>", &options)),
        ImportError::Traversal(_)
    ));
    assert!(matches!(
        import_error(run_with("use </etc/passwd.scad>", &options)),
        ImportError::AbsolutePath(_)
    ));
    assert!(matches!(
        import_error(run_with("include <notes.txt>", &options)),
        ImportError::Extension(_)
    ));
    Ok(())
}

#[test]
fn test_config_library_paths() -> Result<()> {
    let dir = TempDir::new()?;
    let libs = dir.path().join("libs");
    std::fs::create_dir(&libs)?;
    std::fs::write(libs.join("washers.scad"), "module washer() circle(d = $size);")?;

    let config_path = dir.path().join("polyframe.toml");
    std::fs::write(
        &config_path,
        format!(
            "max_recursion_depth = 40\nlibrary_paths = [{:?}]\n\n[special_vars]\nsize = 6\nfn = 12\n",
            libs.display().to_string()
        ),
    )?;

    let options = EngineConfig::from_file(&config_path)?.run_options()?;
    assert_eq!(options.max_recursion_depth, 40);

    let (program, backend) = run_with("use <washers.scad>\nwasher();", &options)?;
    assert_eq!(program.roots.len(), 1);
    assert_eq!(
        backend.primitives(),
        vec![&polyframe_script::Primitive::Circle { r: 3.0, segments: 12 }]
    );
    Ok(())
}
