use std::path::{Component, Path, PathBuf};
use wsm_core::Language;

use crate::types::{ImportDeclaration, ImportKind, ImportTarget};

const ECMA_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs", "cjs", "json"];

/// Resolves import specifiers to files relative to the watched root.
///
/// `is_known` answers whether a relative path is an analyzed file. Path-like
/// specifiers that match nothing are [`ImportTarget::Unresolved`]; bare specifiers
/// (packages, URLs, standard modules) are [`ImportTarget::External`].
pub fn resolve_import(
    from: &Path,
    decl: &ImportDeclaration,
    is_known: &dyn Fn(&Path) -> bool,
) -> ImportTarget {
    let dir = from.parent().unwrap_or_else(|| Path::new(""));
    match Language::from_path(from) {
        Language::JavaScript | Language::TypeScript => resolve_ecma(dir, &decl.specifier, is_known),
        Language::Python => resolve_python(dir, &decl.specifier, is_known),
        Language::Rust if decl.kind == ImportKind::Module => {
            resolve_rust_mod(from, dir, &decl.specifier, is_known)
        }
        Language::Css | Language::Html => resolve_asset(dir, &decl.specifier, is_known),
        _ if is_path_like(&decl.specifier) => first_known(
            normalize(dir, &decl.specifier).into_iter(),
            is_known,
        ),
        _ => ImportTarget::External {
            package: decl.specifier.clone(),
        },
    }
}

fn is_path_like(spec: &str) -> bool {
    spec == "." || spec == ".." || spec.starts_with("./") || spec.starts_with("../") || spec.starts_with('/')
}

/// Lexically joins `spec` onto `dir`. `None` when the result escapes the root.
fn normalize(dir: &Path, spec: &str) -> Option<PathBuf> {
    let base = if spec.starts_with('/') {
        PathBuf::new()
    } else {
        dir.to_path_buf()
    };
    let mut out = PathBuf::new();
    for component in base.join(spec.trim_start_matches('/')).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Some(out)
}

fn first_known(
    candidates: impl Iterator<Item = PathBuf>,
    is_known: &dyn Fn(&Path) -> bool,
) -> ImportTarget {
    for candidate in candidates {
        if is_known(&candidate) {
            return ImportTarget::Internal { path: candidate };
        }
    }
    ImportTarget::Unresolved
}

fn resolve_ecma(dir: &Path, spec: &str, is_known: &dyn Fn(&Path) -> bool) -> ImportTarget {
    if !is_path_like(spec) {
        return ImportTarget::External {
            package: package_name(spec),
        };
    }
    let Some(base) = normalize(dir, spec) else {
        return ImportTarget::Unresolved;
    };

    let mut candidates = vec![base.clone()];
    // ESM-style TypeScript imports name the emitted `.js` file.
    if let Some(ext) = base.extension().and_then(|e| e.to_str()) {
        if matches!(ext, "js" | "jsx" | "mjs") {
            candidates.push(base.with_extension("ts"));
            candidates.push(base.with_extension("tsx"));
        }
    }
    let base_str = base.to_string_lossy();
    for ext in ECMA_EXTENSIONS {
        candidates.push(PathBuf::from(format!("{}.{}", base_str, ext)));
    }
    for ext in ECMA_EXTENSIONS {
        candidates.push(base.join(format!("index.{}", ext)));
    }
    first_known(candidates.into_iter(), is_known)
}

/// `@scope/name/sub` -> `@scope/name`, `name/sub` -> `name`
fn package_name(spec: &str) -> String {
    let mut parts = spec.split('/');
    match parts.next() {
        Some(scope) if scope.starts_with('@') => match parts.next() {
            Some(name) => format!("{}/{}", scope, name),
            None => scope.to_string(),
        },
        Some(first) => first.to_string(),
        None => spec.to_string(),
    }
}

fn resolve_python(dir: &Path, spec: &str, is_known: &dyn Fn(&Path) -> bool) -> ImportTarget {
    let dots = spec.chars().take_while(|c| *c == '.').count();
    let rest = &spec[dots..];
    let parts: Vec<&str> = rest.split('.').filter(|p| !p.is_empty()).collect();

    let module_candidates = |base: &Path| -> Vec<PathBuf> {
        if parts.is_empty() {
            return vec![base.join("__init__.py")];
        }
        let mut module = base.to_path_buf();
        for part in &parts {
            module.push(part);
        }
        vec![module.with_extension("py"), module.join("__init__.py")]
    };

    if dots > 0 {
        let mut base = dir.to_path_buf();
        for _ in 1..dots {
            if !base.pop() {
                return ImportTarget::Unresolved;
            }
        }
        return first_known(module_candidates(&base).into_iter(), is_known);
    }

    // Absolute imports: the project root first, then the importing file's directory.
    let mut candidates = module_candidates(Path::new(""));
    candidates.extend(module_candidates(dir));
    match first_known(candidates.into_iter(), is_known) {
        ImportTarget::Unresolved => ImportTarget::External {
            package: parts.first().map(|p| p.to_string()).unwrap_or_default(),
        },
        internal => internal,
    }
}

fn resolve_rust_mod(
    from: &Path,
    dir: &Path,
    name: &str,
    is_known: &dyn Fn(&Path) -> bool,
) -> ImportTarget {
    let stem = from.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let base = if matches!(stem, "mod" | "lib" | "main") {
        dir.to_path_buf()
    } else {
        dir.join(stem)
    };
    first_known(
        [base.join(format!("{}.rs", name)), base.join(name).join("mod.rs")].into_iter(),
        is_known,
    )
}

fn resolve_asset(dir: &Path, spec: &str, is_known: &dyn Fn(&Path) -> bool) -> ImportTarget {
    let lower = spec.to_ascii_lowercase();
    let is_url = lower.starts_with("http:")
        || lower.starts_with("https:")
        || lower.starts_with("//")
        || lower.starts_with("data:")
        || lower.starts_with("mailto:")
        || lower.starts_with('#');
    if is_url {
        return ImportTarget::External {
            package: spec.to_string(),
        };
    }
    let clean = spec.split(['?', '#']).next().unwrap_or(spec);
    let Some(base) = normalize(dir, clean) else {
        return ImportTarget::Unresolved;
    };
    let with_css = PathBuf::from(format!("{}.css", base.to_string_lossy()));
    first_known([base, with_css].into_iter(), is_known)
}
