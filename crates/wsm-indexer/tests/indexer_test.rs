use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use wsm_core::IndexerConfig;
use wsm_indexer::{DependencyIndexer, ImportTarget, IndexerEvent};

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn p(rel: &str) -> PathBuf {
    PathBuf::from(rel)
}

fn started(dir: &TempDir, config: IndexerConfig) -> (DependencyIndexer, UnboundedReceiver<IndexerEvent>) {
    let (indexer, rx) = DependencyIndexer::new(config);
    indexer.start(dir.path()).unwrap();
    (indexer, rx)
}

fn drain(rx: &mut UnboundedReceiver<IndexerEvent>) -> Vec<IndexerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn full_analysis_builds_edges_and_cycles() -> Result<()> {
    let dir = TempDir::new()?;
    write(dir.path(), "src/a.js", "import b from './b';\nimport React from 'react';\n");
    write(dir.path(), "src/b.js", "const c = require('./c.js');\n");
    write(dir.path(), "src/c.js", "export { a } from './a';\n");
    write(dir.path(), "README.md", "# readme\n");

    let (indexer, mut rx) = started(&dir, IndexerConfig::default());
    let summary = indexer
        .index_all(vec![p("src/a.js"), p("src/b.js"), p("src/c.js"), p("README.md")])
        .await?;

    assert_eq!(summary.files_analyzed, 4);
    assert_eq!(summary.dependencies, 3);
    assert_eq!(summary.cycles, 1);
    // README.md has no analyzer; it is recorded, not dropped
    assert_eq!(summary.parse_errors, 1);

    let report = indexer.analysis_report();
    assert_eq!(report.external_packages, vec!["react".to_string()]);
    assert_eq!(
        report.cycles,
        vec![vec![p("src/a.js"), p("src/b.js"), p("src/c.js"), p("src/a.js")]]
    );
    assert_eq!(report.last_full_analysis, Some(summary));

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1, "bulk mode emits only the completion event");
    assert!(matches!(events[0], IndexerEvent::AnalysisComplete(_)));
    Ok(())
}

#[tokio::test]
async fn added_file_resolves_waiting_imports() -> Result<()> {
    let dir = TempDir::new()?;
    write(dir.path(), "main.py", "from .util import helper\n");
    let (indexer, mut rx) = started(&dir, IndexerConfig::default());

    let main = indexer.update_file(Path::new("main.py")).await?.unwrap();
    assert_eq!(main.imports[0].target, ImportTarget::Unresolved);

    write(dir.path(), "util.py", "def helper():\n    pass\n");
    indexer.update_file(Path::new("util.py")).await?;

    let main = indexer.file_analysis(Path::new("main.py")).unwrap();
    assert_eq!(main.imports[0].target, ImportTarget::Internal { path: p("util.py") });
    assert_eq!(indexer.dependents(Path::new("util.py")), vec![p("main.py")]);

    let analyzed: Vec<PathBuf> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            IndexerEvent::FileAnalyzed { analysis, .. } => Some(analysis.path),
            _ => None,
        })
        .collect();
    assert_eq!(analyzed, vec![p("main.py"), p("util.py"), p("main.py")]);
    Ok(())
}

#[tokio::test]
async fn edits_replace_edges_and_cycles() -> Result<()> {
    let dir = TempDir::new()?;
    write(dir.path(), "a.ts", "import { b } from './b';\n");
    write(dir.path(), "b.ts", "import { a } from './a';\n");
    let (indexer, mut rx) = started(&dir, IndexerConfig::default());
    indexer.index_all(vec![p("a.ts"), p("b.ts")]).await?;
    assert_eq!(indexer.cycles().len(), 1);
    drain(&mut rx);

    write(dir.path(), "b.ts", "export const b = 1;\n");
    let b = indexer.update_file(Path::new("b.ts")).await?.unwrap();
    assert!(b.imports.is_empty());
    assert_eq!(b.exports, vec!["b".to_string()]);
    assert!(indexer.cycles().is_empty());
    assert_eq!(indexer.analysis_report().total_dependencies, 1);

    match drain(&mut rx).as_slice() {
        [IndexerEvent::FileAnalyzed { analysis, cycles }] => {
            assert_eq!(analysis.path, p("b.ts"));
            assert!(cycles.is_empty());
        }
        other => panic!("unexpected events: {:?}", other),
    }

    write(dir.path(), "b.ts", "import { a } from './a';\n");
    indexer.update_file(Path::new("b.ts")).await?;
    match drain(&mut rx).as_slice() {
        [IndexerEvent::FileAnalyzed { cycles, .. }] => {
            assert_eq!(cycles, &vec![vec![p("a.ts"), p("b.ts"), p("a.ts")]]);
        }
        other => panic!("unexpected events: {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn importer_of_a_cycle_reports_it() -> Result<()> {
    let dir = TempDir::new()?;
    write(dir.path(), "a.js", "export const a = 1;\n");
    write(dir.path(), "b.js", "import './c';\n");
    write(dir.path(), "c.js", "import './b';\n");
    let (indexer, mut rx) = started(&dir, IndexerConfig::default());
    indexer.index_all(vec![p("a.js"), p("b.js"), p("c.js")]).await?;
    drain(&mut rx);

    write(dir.path(), "a.js", "import './b';\n");
    indexer.update_file(Path::new("a.js")).await?;
    match drain(&mut rx).as_slice() {
        [IndexerEvent::FileAnalyzed { analysis, cycles }] => {
            assert_eq!(analysis.path, p("a.js"));
            assert_eq!(cycles, &vec![vec![p("b.js"), p("c.js"), p("b.js")]]);
        }
        other => panic!("unexpected events: {:?}", other),
    }
    assert_eq!(indexer.cycles(), vec![vec![p("b.js"), p("c.js"), p("b.js")]]);
    Ok(())
}

#[tokio::test]
async fn updates_leave_unrelated_files_untouched() -> Result<()> {
    let dir = TempDir::new()?;
    write(dir.path(), "a.py", "import os\n");
    write(dir.path(), "b.py", "from . import c\n");
    write(dir.path(), "c.py", "X = 1\n");
    let (indexer, mut rx) = started(&dir, IndexerConfig::default());
    indexer.index_all(vec![p("a.py"), p("b.py"), p("c.py")]).await?;
    let before = indexer.file_analysis(Path::new("b.py")).unwrap();
    drain(&mut rx);

    write(dir.path(), "a.py", "import sys\nimport json\n");
    indexer.update_file(Path::new("a.py")).await?;

    assert_eq!(indexer.file_analysis(Path::new("b.py")).unwrap(), before);
    assert_eq!(indexer.dependents(Path::new("c.py")), vec![p("b.py")]);
    match drain(&mut rx).as_slice() {
        [IndexerEvent::FileAnalyzed { analysis, .. }] => assert_eq!(analysis.path, p("a.py")),
        other => panic!("unexpected events: {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn deletion_reverts_importers_to_unresolved() -> Result<()> {
    let dir = TempDir::new()?;
    write(dir.path(), "index.js", "import './lib';\n");
    write(dir.path(), "lib.js", "import './index';\n");
    let (indexer, mut rx) = started(&dir, IndexerConfig::default());
    indexer.index_all(vec![p("index.js"), p("lib.js")]).await?;
    drain(&mut rx);

    std::fs::remove_file(dir.path().join("lib.js"))?;
    assert!(indexer.update_file(Path::new("lib.js")).await?.is_none());

    let index = indexer.file_analysis(Path::new("index.js")).unwrap();
    assert_eq!(index.imports[0].target, ImportTarget::Unresolved);
    assert!(indexer.cycles().is_empty());
    assert_eq!(indexer.analysis_count(), 1);

    let events = drain(&mut rx);
    assert!(matches!(&events[0], IndexerEvent::FileRemoved { path } if path == &p("lib.js")));
    assert!(matches!(&events[1], IndexerEvent::FileAnalyzed { analysis, .. } if analysis.path == p("index.js")));

    assert!(!indexer.remove_file(Path::new("lib.js"))?);
    Ok(())
}

#[tokio::test]
async fn parse_errors_do_not_abort_the_batch() -> Result<()> {
    let dir = TempDir::new()?;
    write(dir.path(), "bad.js", "import { from ;;; (\n");
    write(dir.path(), "good.js", "import './bad';\n");
    std::fs::write(dir.path().join("blob.js"), [0xff, 0xfe, 0x00, 0x41])?;

    let config = IndexerConfig {
        batch_size: 1,
        ..IndexerConfig::default()
    };
    let (indexer, _rx) = started(&dir, config);
    let summary = indexer
        .index_all(vec![p("bad.js"), p("blob.js"), p("good.js")])
        .await?;

    assert_eq!(summary.files_analyzed, 3);
    assert_eq!(summary.parse_errors, 2);
    let bad = indexer.file_analysis(Path::new("bad.js")).unwrap();
    assert!(bad.parse_error.unwrap().contains("syntax error"));
    assert!(bad.imports.is_empty());
    let good = indexer.file_analysis(Path::new("good.js")).unwrap();
    assert_eq!(good.imports[0].target, ImportTarget::Internal { path: p("bad.js") });
    Ok(())
}

#[tokio::test]
async fn oversized_files_are_recorded_without_parsing() -> Result<()> {
    let dir = TempDir::new()?;
    write(dir.path(), "big.js", &"import './x';\n".repeat(100));
    let config = IndexerConfig {
        max_file_bytes: 64,
        ..IndexerConfig::default()
    };
    let (indexer, _rx) = started(&dir, config);
    let big = indexer.update_file(Path::new("big.js")).await?.unwrap();
    assert!(big.imports.is_empty());
    assert!(big.parse_error.unwrap().starts_with("file too large"));
    Ok(())
}

#[tokio::test]
async fn full_analysis_reconciles_untracked_files() -> Result<()> {
    let dir = TempDir::new()?;
    write(dir.path(), "a.js", "import './b';\n");
    write(dir.path(), "b.js", "");
    let (indexer, _rx) = started(&dir, IndexerConfig::default());
    indexer.index_all(vec![p("a.js"), p("b.js")]).await?;
    assert_eq!(indexer.analysis_report().total_dependencies, 1);

    let summary = indexer.index_all(vec![p("a.js")]).await?;
    assert_eq!(summary.files_analyzed, 1);
    assert_eq!(summary.dependencies, 0);
    let a = indexer.file_analysis(Path::new("a.js")).unwrap();
    assert_eq!(a.imports[0].target, ImportTarget::Unresolved);
    Ok(())
}

#[tokio::test]
async fn snapshot_is_written_after_full_analysis() -> Result<()> {
    let dir = TempDir::new()?;
    let out = TempDir::new()?;
    write(dir.path(), "a.js", "import './b';\n");
    write(dir.path(), "b.js", "import './a';\n");
    let snapshot_path = out.path().join("nested/index.json");
    let config = IndexerConfig {
        snapshot_path: Some(snapshot_path.clone()),
        ..IndexerConfig::default()
    };
    let (indexer, _rx) = started(&dir, config);
    indexer.index_all(vec![p("a.js"), p("b.js")]).await?;

    let json: serde_json::Value = serde_json::from_slice(&std::fs::read(&snapshot_path)?)?;
    assert_eq!(json["metadata"]["total_files"], 2);
    assert_eq!(json["metadata"]["total_dependencies"], 2);
    assert_eq!(json["metadata"]["cycles"].as_array().unwrap().len(), 1);
    assert_eq!(json["files"].as_array().unwrap().len(), 2);
    Ok(())
}

#[tokio::test]
async fn operations_require_a_running_indexer() -> Result<()> {
    let dir = TempDir::new()?;
    write(dir.path(), "a.js", "");
    let (indexer, _rx) = DependencyIndexer::new(IndexerConfig::default());
    assert!(indexer.update_file(Path::new("a.js")).await.is_err());

    indexer.start(dir.path())?;
    assert!(indexer.start(dir.path()).is_err());
    indexer.update_file(Path::new("a.js")).await?;
    indexer.stop();
    assert!(indexer.index_all(vec![p("a.js")]).await.is_err());

    // Restarting discards the previous index
    indexer.start(dir.path())?;
    assert_eq!(indexer.analysis_count(), 0);

    let missing = dir.path().join("nope");
    indexer.stop();
    assert!(indexer.start(&missing).unwrap_err().is_fatal());
    Ok(())
}

#[tokio::test]
async fn concurrent_updates_keep_graph_consistent() -> Result<()> {
    let dir = TempDir::new()?;
    for i in 0..20 {
        write(dir.path(), &format!("m{}.js", i), &format!("import './m{}';\n", (i + 1) % 20));
    }
    let (indexer, _rx) = started(&dir, IndexerConfig::default());
    let indexer = std::sync::Arc::new(indexer);

    let mut handles = Vec::new();
    for i in 0..20 {
        let indexer = indexer.clone();
        handles.push(tokio::spawn(async move {
            indexer.update_file(&PathBuf::from(format!("m{}.js", i))).await
        }));
    }
    for handle in handles {
        handle.await??;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    let report = indexer.analysis_report();
    assert_eq!(report.total_files, 20);
    assert_eq!(report.total_dependencies, 20);
    assert_eq!(report.unresolved_imports, 0);
    assert_eq!(report.cycles.len(), 1);
    assert_eq!(report.cycles[0].len(), 21);
    Ok(())
}
