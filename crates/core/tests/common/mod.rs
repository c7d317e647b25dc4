//! Shared fixtures for executor integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;
use taskmemo_cache::{CacheStore, LocalStore, RemoteStore};
use taskmemo_core::RunContext;
use taskmemo_core::tasks::{
    Executor, ExecutorConfig, FunctionAction, InputDescriptor, RunSummary, Task,
};

pub fn write(root: &Path, rel: &str, data: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

pub fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

/// Transform every file of `from` into a file of `to` inside the sandbox.
fn transform(dir: &Path, from: &str, to: &str, ext: &str, prefix: &str) -> Result<(), String> {
    let source = dir.join(from);
    let target = dir.join(to);
    fs::create_dir_all(&target).map_err(|e| e.to_string())?;
    let mut entries: Vec<_> = fs::read_dir(&source)
        .map_err(|e| e.to_string())?
        .filter_map(Result::ok)
        .collect();
    entries.sort_by_key(fs::DirEntry::file_name);
    for entry in entries {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let stem = path.file_stem().unwrap().to_string_lossy().into_owned();
        let body = fs::read_to_string(&path).map_err(|e| e.to_string())?;
        fs::write(target.join(format!("{stem}.{ext}")), format!("{prefix}({body})"))
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// Stub generation: `src/*.src` -> `stubs/*.java`
pub fn stub_task() -> Task {
    Task::new(
        "stub",
        FunctionAction::new("stub-v1", |dir| transform(dir, "src", "stubs", "java", "stub")),
    )
    .input(InputDescriptor::path("src"))
    .input(InputDescriptor::property("jvm-target", "17"))
    .output("stubs")
}

/// Annotation processing: `stubs/*.java` -> `gen/*.gen`
pub fn process_task() -> Task {
    Task::new(
        "process",
        FunctionAction::new("process-v1", |dir| transform(dir, "stubs", "gen", "gen", "processed")),
    )
    .input(InputDescriptor::path("stubs"))
    .output("gen")
    .depends_on("stub")
}

pub fn scenario_tasks() -> Vec<Task> {
    vec![stub_task(), process_task()]
}

pub fn scenario_project(root: &Path) {
    write(root, "src/A.src", "val x:Int=1");
    write(root, "src/B.src", "val y:Int=2");
}

pub fn store(cache: &Path) -> CacheStore {
    CacheStore::new(LocalStore::open(cache, None).unwrap())
}

pub fn store_with_remote(cache: &Path, remote: Arc<dyn RemoteStore>, push: bool) -> CacheStore {
    store(cache).with_remote(remote, push)
}

pub async fn run_with(
    project: &Path,
    cache: CacheStore,
    config: ExecutorConfig,
    tasks: Vec<Task>,
) -> RunSummary {
    let ctx = Arc::new(RunContext::new(project, cache).unwrap());
    let mut executor = Executor::new(ctx, config, tasks).unwrap();
    executor.run(&[] as &[&str]).await.unwrap()
}

pub async fn run(project: &Path, cache: &Path, tasks: Vec<Task>) -> RunSummary {
    run_with(project, store(cache), ExecutorConfig::default(), tasks).await
}
