#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use leela::coverage::CoverageMap;
use leela::error::HarnessError;
use leela::harness::{
    Harness, ModuleOverride, Outcome, OverrideId, Phase, SnapshotId, TestListener, TestReport,
    TestRequest,
};

/// What a scripted test does when run against the sources it imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
    /// Fixture failure.
    SetupError,
    /// Exception escapes the framework.
    Crash,
    Hang,
}

type Check = Rc<dyn Fn(&Imported) -> Verdict>;

#[derive(Clone)]
pub struct ScriptedTest {
    pub id: String,
    pub file: PathBuf,
    pub imports: Vec<String>,
    /// Lines reported as executed during a traced run.
    pub covers: Vec<(PathBuf, usize)>,
    check: Check,
}

impl ScriptedTest {
    pub fn new(
        id: &str,
        file: impl Into<PathBuf>,
        imports: &[&str],
        check: impl Fn(&Imported) -> Verdict + 'static,
    ) -> Self {
        ScriptedTest {
            id: id.to_string(),
            file: file.into(),
            imports: imports.iter().map(|s| s.to_string()).collect(),
            covers: Vec::new(),
            check: Rc::new(check),
        }
    }

    pub fn covering(mut self, file: impl Into<PathBuf>, lines: &[usize]) -> Self {
        let file = file.into();
        self.covers.extend(lines.iter().map(|&l| (file.clone(), l)));
        self
    }
}

/// Sources a test got for each import.
pub struct Imported {
    sources: HashMap<String, String>,
}

impl Imported {
    pub fn source(&self, module: &str) -> &str {
        self.sources.get(module).map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedModule {
    pub file: Option<PathBuf>,
    pub source: String,
}

type Snapshot = (Vec<u64>, BTreeMap<String, CachedModule>);

/// In-memory stand-in for the Python worker: a finder chain, a module cache
/// and scripted tests.
#[derive(Default)]
pub struct MemoryHarness {
    pub disk: HashMap<String, (PathBuf, String)>,
    pub tests: Vec<ScriptedTest>,
    /// Installed overrides, front first.
    pub meta_path: Vec<u64>,
    pub overrides: HashMap<u64, Vec<ModuleOverride>>,
    pub modules: BTreeMap<String, CachedModule>,
    snapshots: HashMap<u64, Snapshot>,
    next_id: u64,
    pub calls: Vec<String>,
    pub runs: Vec<Vec<String>>,
    pub cpu_limit: Option<usize>,
    pub fail_snapshot: bool,
    pub fail_coverage: bool,
    /// Leaves a finder and a project module behind when a test crashes.
    pub leak_on_crash: bool,
    pub project_dir: PathBuf,
}

impl MemoryHarness {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        MemoryHarness {
            project_dir: project_dir.into(),
            ..Self::default()
        }
    }

    pub fn add_module(&mut self, name: &str, file: impl Into<PathBuf>, source: &str) -> &mut Self {
        self.disk.insert(name.to_string(), (file.into(), source.to_string()));
        self
    }

    pub fn add_test(&mut self, test: ScriptedTest) -> &mut Self {
        self.tests.push(test);
        self
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.calls.iter().filter(|c| c.as_str() == name).count()
    }

    fn new_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn import(&mut self, name: &str) -> Option<String> {
        if let Some(cached) = self.modules.get(name) {
            return Some(cached.source.clone());
        }
        let from_hook = self.meta_path.iter().find_map(|id| {
            self.overrides
                .get(id)?
                .iter()
                .find(|o| o.module_name == name)
                .map(|o| (o.file_path.clone(), o.source.clone()))
        });
        let (file, source) = from_hook.or_else(|| self.disk.get(name).cloned())?;
        self.modules.insert(
            name.to_string(),
            CachedModule {
                file: Some(file),
                source: source.clone(),
            },
        );
        Some(source)
    }

    fn selected(&self, request: &TestRequest<'_>) -> Vec<ScriptedTest> {
        self.tests
            .iter()
            .filter(|t| {
                if request.test_ids.is_empty() {
                    t.file.starts_with(request.scope)
                } else {
                    request.test_ids.contains(&t.id)
                }
            })
            .cloned()
            .collect()
    }

    /// Imports then runs one test; `None` means the import failed.
    fn execute(&mut self, test: &ScriptedTest) -> Option<Verdict> {
        let mut sources = HashMap::new();
        for name in &test.imports {
            let source = self.import(name)?;
            sources.insert(name.clone(), source);
        }
        Some((test.check)(&Imported { sources }))
    }

    fn ensure_under_project(&self, file: &Option<PathBuf>, project_dir: &Path) -> bool {
        file.as_ref().is_some_and(|f| f.starts_with(project_dir))
    }
}

fn report(listener: &mut dyn TestListener, nodeid: &str, phase: Phase, outcome: Outcome) {
    listener.on_report(&TestReport {
        nodeid: nodeid.to_string(),
        phase,
        outcome,
    });
}

impl Harness for MemoryHarness {
    fn reset_stale_state(&mut self) {
        self.calls.push("reset".into());
        self.meta_path.clear();
        self.overrides.clear();
        let tmp = std::env::temp_dir();
        self.modules
            .retain(|_, m| !m.file.as_ref().is_some_and(|f| f.starts_with(&tmp)));
    }

    fn limit_cpu(&mut self, cores: usize) -> Result<(), HarnessError> {
        self.calls.push("limit_cpu".into());
        self.cpu_limit = Some(cores);
        Ok(())
    }

    fn install_override(&mut self, overrides: &[ModuleOverride]) -> Result<OverrideId, HarnessError> {
        self.calls.push("install".into());
        let id = self.new_id();
        self.overrides.insert(id, overrides.to_vec());
        self.meta_path.insert(0, id);
        Ok(OverrideId { generation: 1, id })
    }

    fn remove_override(&mut self, id: OverrideId) {
        self.calls.push("remove".into());
        self.overrides.remove(&id.id);
        self.meta_path.retain(|f| *f != id.id);
    }

    fn evict_modules(&mut self, module_names: &[String], project_dir: &Path) {
        self.calls.push("evict".into());
        let names: Vec<String> = module_names.to_vec();
        let project_dir = project_dir.to_path_buf();
        let keep: BTreeMap<String, CachedModule> = std::mem::take(&mut self.modules)
            .into_iter()
            .filter(|(name, m)| {
                let targeted = names
                    .iter()
                    .any(|n| name == n || name.starts_with(&format!("{n}.")));
                !targeted && !self.ensure_under_project(&m.file, &project_dir)
            })
            .collect();
        self.modules = keep;
    }

    fn purge_framework_caches(&mut self) {
        self.calls.push("purge".into());
    }

    fn snapshot(&mut self) -> Result<SnapshotId, HarnessError> {
        self.calls.push("snapshot".into());
        if self.fail_snapshot {
            return Err(HarnessError::Worker("snapshot refused".into()));
        }
        let id = self.new_id();
        self.snapshots
            .insert(id, (self.meta_path.clone(), self.modules.clone()));
        Ok(SnapshotId { generation: 1, id })
    }

    fn restore(&mut self, snapshot: SnapshotId) -> Result<(), HarnessError> {
        self.calls.push("restore".into());
        let Some((meta_path, saved)) = self.snapshots.remove(&snapshot.id) else {
            return Ok(());
        };
        self.meta_path = meta_path;
        for (name, module) in &saved {
            self.modules.insert(name.clone(), module.clone());
        }
        let project_dir = self.project_dir.clone();
        let added: Vec<String> = self
            .modules
            .iter()
            .filter(|(name, m)| !saved.contains_key(*name) && self.ensure_under_project(&m.file, &project_dir))
            .map(|(name, _)| name.clone())
            .collect();
        for name in added {
            self.modules.remove(&name);
        }
        Ok(())
    }

    fn sweep_overrides(&mut self) {
        self.calls.push("sweep".into());
        self.meta_path.clear();
        self.overrides.clear();
    }

    fn run_tests(
        &mut self,
        request: &TestRequest<'_>,
        listener: &mut dyn TestListener,
    ) -> Result<(), HarnessError> {
        self.calls.push("run".into());
        let selected = self.selected(request);
        self.runs.push(selected.iter().map(|t| t.id.clone()).collect());
        for test in selected {
            match self.execute(&test) {
                None => {
                    report(listener, &test.id, Phase::Collect, Outcome::Failed);
                    return Ok(());
                }
                Some(Verdict::Pass) => report(listener, &test.id, Phase::Call, Outcome::Passed),
                Some(Verdict::Fail) => {
                    report(listener, &test.id, Phase::Call, Outcome::Failed);
                    return Ok(());
                }
                Some(Verdict::SetupError) => {
                    report(listener, &test.id, Phase::Setup, Outcome::Failed);
                    return Ok(());
                }
                Some(Verdict::Crash) => {
                    if self.leak_on_crash {
                        let id = self.new_id();
                        self.meta_path.insert(0, id);
                        self.modules.insert(
                            "leaked_fixture".into(),
                            CachedModule {
                                file: Some(self.project_dir.join("leaked_fixture.py")),
                                source: String::new(),
                            },
                        );
                    }
                    return Err(HarnessError::Worker(format!("{} blew up", test.id)));
                }
                Some(Verdict::Hang) => {
                    return Err(HarnessError::Timeout(request.timeout.unwrap_or(Duration::from_secs(1))));
                }
            }
        }
        Ok(())
    }

    fn collect_coverage(
        &mut self,
        targets: &[PathBuf],
        request: &TestRequest<'_>,
    ) -> Result<CoverageMap, HarnessError> {
        self.calls.push("coverage".into());
        if self.fail_coverage {
            return Err(HarnessError::Worker("tracer failed".into()));
        }
        let mut map = CoverageMap::new();
        for test in self.selected(request) {
            let _ = self.execute(&test);
            for (file, line) in &test.covers {
                if targets.contains(file) {
                    map.add(file, *line, &test.id);
                }
            }
        }
        Ok(map)
    }
}

/// Tiny evaluator for single-expression functions, enough to decide whether
/// a scripted test would pass against a mutated module.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    None,
}

/// Evaluates the first `return` of `def name(...)` with `args` bound.
pub fn call(source: &str, name: &str, args: &[(&str, i64)]) -> Option<Value> {
    let header = format!("def {name}(");
    let mut lines = source.lines().skip_while(|l| !l.trim_start().starts_with(&header));
    let def_line = lines.next()?;
    let inline = def_line.split_once("):").map(|(_, rest)| rest.trim()).filter(|r| !r.is_empty());
    let body = match inline {
        Some(body) => body.to_string(),
        None => lines.find(|l| l.trim_start().starts_with("return "))?.trim().to_string(),
    };
    let expr = body
        .strip_prefix("return ")
        .or_else(|| body.split_once(" return ").map(|(_, e)| e))?
        .trim();
    eval(expr, args)
}

fn eval(expr: &str, args: &[(&str, i64)]) -> Option<Value> {
    let expr = expr.trim();
    if let Some(inner) = wrapped(expr, "-(") {
        return Some(Value::Int(-int(eval(inner, args)?)?));
    }
    if let Some(inner) = wrapped(expr, "(") {
        return eval(inner, args);
    }
    if let Some(inner) = expr.strip_prefix("not ") {
        let inner = inner.trim().trim_start_matches('(').trim_end_matches(')');
        return match eval(inner, args)? {
            Value::Bool(b) => Some(Value::Bool(!b)),
            Value::Int(i) => Some(Value::Bool(i == 0)),
            Value::None => Some(Value::Bool(true)),
        };
    }
    for op in [">=", "<=", "==", "!=", ">", "<", "//", "**", "+", "-", "*", "%"] {
        if let Some((lhs, rhs)) = split_binary(expr, op) {
            let (a, b) = (int(eval(lhs, args)?)?, int(eval(rhs, args)?)?);
            return Some(match op {
                ">=" => Value::Bool(a >= b),
                "<=" => Value::Bool(a <= b),
                "==" => Value::Bool(a == b),
                "!=" => Value::Bool(a != b),
                ">" => Value::Bool(a > b),
                "<" => Value::Bool(a < b),
                "//" => Value::Int(a.checked_div_euclid(b)?),
                "**" => Value::Int(a.checked_pow(u32::try_from(b).ok()?)?),
                "+" => Value::Int(a + b),
                "-" => Value::Int(a - b),
                "*" => Value::Int(a * b),
                "%" => Value::Int(a.checked_rem_euclid(b)?),
                _ => return None,
            });
        }
    }
    atom(expr, args)
}

/// Inner text when `expr` is `open ... )` with the closing paren matching.
fn wrapped<'a>(expr: &'a str, open: &str) -> Option<&'a str> {
    let inner = expr.strip_prefix(open)?.strip_suffix(')')?;
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return None;
        }
    }
    (depth == 0).then_some(inner)
}

fn split_binary<'a>(expr: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    let spaced = format!(" {op} ");
    let (lhs, rhs) = expr.split_once(&spaced)?;
    Some((lhs, rhs))
}

fn int(v: Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(i),
        Value::Bool(b) => Some(b as i64),
        Value::None => None,
    }
}

fn atom(text: &str, args: &[(&str, i64)]) -> Option<Value> {
    let text = text.trim().trim_start_matches('(').trim_end_matches(')');
    match text {
        "True" => Some(Value::Bool(true)),
        "False" => Some(Value::Bool(false)),
        "None" => Some(Value::None),
        _ => {
            if let Some(rest) = text.strip_prefix('-') {
                return Some(Value::Int(-int(atom(rest, args)?)?));
            }
            if let Ok(i) = text.parse() {
                return Some(Value::Int(i));
            }
            args.iter().find(|(n, _)| *n == text).map(|(_, v)| Value::Int(*v))
        }
    }
}

pub fn verdict(ok: bool) -> Verdict {
    if ok { Verdict::Pass } else { Verdict::Fail }
}
