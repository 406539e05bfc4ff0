//! In-process query service with a simulated catalog.
//!
//! Understands the statements the engine renders (database/table/view DDL,
//! insert-select, show tables) and keeps row counts per table, which is enough
//! to observe duplicate loads. Failures, hangs and slow jobs can be injected.

use super::{ExecutionOptions, JobStatistics, JobStatus, QueryJob, QueryService, ResultPage, Row};
use crate::errors::QueryError;
use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    ExternalTable,
    Table,
    View,
}

#[derive(Debug, Clone)]
struct CatalogObject {
    kind: ObjectKind,
    rows: u64,
}

#[derive(Debug, Clone)]
pub struct SubmittedStatement {
    pub job_id: String,
    pub sql: String,
    pub options: ExecutionOptions,
}

struct JobEntry {
    job: QueryJob,
    polls_left: u32,
    hanging: bool,
    rows: Vec<Row>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    databases: BTreeMap<String, BTreeMap<String, CatalogObject>>,
    jobs: HashMap<String, JobEntry>,
    statements: Vec<SubmittedStatement>,
    failures: Vec<(String, String)>,
    rejections: Vec<(String, String)>,
    hangs: Vec<String>,
    raw_rows: HashMap<String, u64>,
    listing: Option<Vec<String>>,
    polls_until_done: u32,
    status_calls: u64,
}

pub struct InMemoryQueryService {
    state: Mutex<State>,
    page_size: usize,
}

impl Default for InMemoryQueryService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueryService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: 1000,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Jobs report `Running` for this many status polls before finishing.
    pub fn set_polls_until_done(&self, polls: u32) {
        self.lock().polls_until_done = polls;
    }

    /// Statements containing `pattern` fail in the backend with `reason`.
    pub fn fail_on(&self, pattern: &str, reason: &str) {
        self.lock()
            .failures
            .push((pattern.to_string(), reason.to_string()));
    }

    /// Statements containing `pattern` are refused at submission.
    pub fn reject_on(&self, pattern: &str, reason: &str) {
        self.lock()
            .rejections
            .push((pattern.to_string(), reason.to_string()));
    }

    /// Statements containing `pattern` never leave the `Running` state.
    pub fn hang_on(&self, pattern: &str) {
        self.lock().hangs.push(pattern.to_string());
    }

    pub fn clear_faults(&self) {
        let mut st = self.lock();
        st.failures.clear();
        st.rejections.clear();
        st.hangs.clear();
    }

    /// Rows present in the raw files behind `table`, picked up when it is created.
    pub fn set_raw_rows(&self, table: &str, rows: u64) {
        self.lock().raw_rows.insert(table.to_string(), rows);
    }

    /// Pins what `SHOW TABLES` returns, in this order, regardless of the catalog.
    pub fn set_listing(&self, tables: &[&str]) {
        self.lock().listing = Some(tables.iter().map(|t| t.to_string()).collect());
    }

    pub fn add_database(&self, database: &str) {
        self.lock()
            .databases
            .entry(database.to_string())
            .or_default();
    }

    /// Seeds an external table, creating the database when needed.
    pub fn add_table(&self, database: &str, table: &str, rows: u64) {
        self.lock()
            .databases
            .entry(database.to_string())
            .or_default()
            .insert(
                table.to_string(),
                CatalogObject {
                    kind: ObjectKind::ExternalTable,
                    rows,
                },
            );
    }

    pub fn has_database(&self, database: &str) -> bool {
        self.lock().databases.contains_key(database)
    }

    /// Catalog listing in the same order `SHOW TABLES` returns it.
    pub fn tables(&self, database: &str) -> Vec<String> {
        self.lock()
            .databases
            .get(database)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn object_kind(&self, database: &str, name: &str) -> Option<ObjectKind> {
        self.lock()
            .databases
            .get(database)
            .and_then(|t| t.get(name))
            .map(|o| o.kind)
    }

    pub fn table_rows(&self, database: &str, table: &str) -> Option<u64> {
        self.lock()
            .databases
            .get(database)
            .and_then(|t| t.get(table))
            .map(|o| o.rows)
    }

    pub fn submitted(&self) -> Vec<SubmittedStatement> {
        self.lock().statements.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.iter().map(|s| s.sql.clone()).collect()
    }

    pub fn clear_statements(&self) {
        self.lock().statements.clear();
    }

    pub fn status_calls(&self) -> u64 {
        self.lock().status_calls
    }

    pub fn job(&self, job_id: &str) -> Option<QueryJob> {
        self.lock().jobs.get(job_id).map(|j| j.job.clone())
    }
}

#[async_trait]
impl QueryService for InMemoryQueryService {
    async fn submit(&self, sql: &str, options: &ExecutionOptions) -> Result<String, QueryError> {
        let mut st = self.lock();

        if let Some((_, reason)) = st.rejections.iter().find(|(p, _)| sql.contains(p.as_str())) {
            return Err(QueryError::Submission(reason.clone()));
        }
        if sql.trim().is_empty() {
            return Err(QueryError::Submission("empty statement".into()));
        }

        st.next_id += 1;
        let job_id = format!("q-{}", st.next_id);
        st.statements.push(SubmittedStatement {
            job_id: job_id.clone(),
            sql: sql.to_string(),
            options: options.clone(),
        });

        let injected = st
            .failures
            .iter()
            .find(|(p, _)| sql.contains(p.as_str()))
            .map(|(_, r)| r.clone());
        let hanging = st.hangs.iter().any(|p| sql.contains(p.as_str()));

        let mut job = QueryJob {
            id: job_id.clone(),
            status: JobStatus::Running,
            reason: None,
            result_location: options
                .result_location
                .as_ref()
                .map(|l| format!("{}/{}.csv", l.trim_end_matches('/'), job_id)),
            statistics: JobStatistics::default(),
        };
        let mut rows = Vec::new();

        if !hanging {
            let outcome = match injected {
                Some(reason) => Err(reason),
                None => apply(&mut st, sql, options),
            };
            match outcome {
                Ok(effect) => {
                    job.status = JobStatus::Succeeded;
                    job.statistics.rows_affected = effect.rows_affected;
                    job.statistics.execution_ms = Some(1);
                    rows = effect.rows;
                }
                Err(reason) => {
                    job.status = JobStatus::Failed;
                    job.reason = Some(reason);
                }
            }
        }

        let polls_left = st.polls_until_done;
        st.jobs.insert(
            job_id.clone(),
            JobEntry {
                job,
                polls_left,
                hanging,
                rows,
            },
        );
        Ok(job_id)
    }

    async fn get_status(&self, job_id: &str) -> Result<QueryJob, QueryError> {
        let mut st = self.lock();
        st.status_calls += 1;
        let entry = st
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueryError::Submission(format!("unknown query id {}", job_id)))?;

        if entry.polls_left > 0 && entry.job.status.is_terminal() {
            entry.polls_left -= 1;
            let mut running = entry.job.clone();
            running.status = JobStatus::Running;
            running.reason = None;
            return Ok(running);
        }
        Ok(entry.job.clone())
    }

    async fn get_results(
        &self,
        job_id: &str,
        next_token: Option<&str>,
    ) -> Result<ResultPage, QueryError> {
        let st = self.lock();
        let entry = st
            .jobs
            .get(job_id)
            .ok_or_else(|| QueryError::Submission(format!("unknown query id {}", job_id)))?;
        if entry.job.status != JobStatus::Succeeded {
            return Err(QueryError::Submission(format!(
                "query {} has no results (status {:?})",
                job_id, entry.job.status
            )));
        }

        let offset = match next_token {
            Some(t) => t
                .parse::<usize>()
                .map_err(|_| QueryError::Submission(format!("invalid page token {}", t)))?,
            None => 0,
        };
        let end = (offset + self.page_size).min(entry.rows.len());
        let rows = entry.rows.get(offset..end).unwrap_or_default().to_vec();
        let next_token = (end < entry.rows.len()).then(|| end.to_string());
        Ok(ResultPage { rows, next_token })
    }

    async fn cancel(&self, job_id: &str) -> Result<(), QueryError> {
        let mut st = self.lock();
        let entry = st
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueryError::Submission(format!("unknown query id {}", job_id)))?;
        if !entry.job.status.is_terminal() {
            entry.hanging = false;
            entry.polls_left = 0;
            entry.job.status = JobStatus::Cancelled;
        }
        Ok(())
    }

    fn service_name(&self) -> &'static str {
        "memory"
    }
}

struct Effect {
    rows_affected: Option<u64>,
    rows: Vec<Row>,
}

impl Effect {
    fn none() -> Self {
        Effect {
            rows_affected: None,
            rows: Vec::new(),
        }
    }
}

struct Patterns {
    create_database: Regex,
    create_external: Regex,
    create_table: Regex,
    ctas_source: Regex,
    create_view: Regex,
    insert: Regex,
    show_tables: Regex,
}

fn patterns() -> &'static Patterns {
    static P: OnceLock<Patterns> = OnceLock::new();
    P.get_or_init(|| {
        let re = |s: &str| Regex::new(s).expect("static pattern");
        Patterns {
            create_database: re(r"(?is)^\s*CREATE\s+DATABASE\s+(IF\s+NOT\s+EXISTS\s+)?(\w+)"),
            create_external: re(
                r"(?is)^\s*CREATE\s+EXTERNAL\s+TABLE\s+(IF\s+NOT\s+EXISTS\s+)?(?:(\w+)\.)?(\w+)",
            ),
            create_table: re(r"(?is)^\s*CREATE\s+TABLE\s+(IF\s+NOT\s+EXISTS\s+)?(?:(\w+)\.)?(\w+)"),
            ctas_source: re(r"(?is)\bAS\s+SELECT\b.*?\bFROM\s+(?:(\w+)\.)?(\w+)"),
            create_view: re(r"(?is)^\s*CREATE\s+OR\s+REPLACE\s+VIEW\s+(?:(\w+)\.)?(\w+)"),
            insert: re(
                r"(?is)^\s*INSERT\s+INTO\s+(?:(\w+)\.)?(\w+)\s.*?\bFROM\s+(?:(\w+)\.)?(\w+)",
            ),
            show_tables: re(r"(?is)^\s*SHOW\s+TABLES(?:\s+IN\s+(\w+))?"),
        }
    })
}

fn resolve_db(
    st: &State,
    qualifier: Option<regex::Match<'_>>,
    options: &ExecutionOptions,
) -> Result<String, String> {
    let db = qualifier
        .map(|m| m.as_str().to_string())
        .or_else(|| options.database.clone())
        .ok_or_else(|| "SCHEMA_NOT_FOUND: no database in statement or context".to_string())?;
    if !st.databases.contains_key(&db) {
        return Err(format!("SCHEMA_NOT_FOUND: Database {} does not exist", db));
    }
    Ok(db)
}

fn source_rows(
    st: &State,
    qualifier: Option<regex::Match<'_>>,
    table: &str,
    options: &ExecutionOptions,
) -> Result<u64, String> {
    let db = resolve_db(st, qualifier, options)?;
    st.databases[&db]
        .get(table)
        .map(|o| o.rows)
        .ok_or_else(|| format!("TABLE_NOT_FOUND: Table {}.{} does not exist", db, table))
}

fn create_object(
    st: &mut State,
    db: &str,
    name: &str,
    if_not_exists: bool,
    object: CatalogObject,
) -> Result<Effect, String> {
    let tables = st.databases.entry(db.to_string()).or_default();
    if tables.contains_key(name) {
        if if_not_exists {
            return Ok(Effect::none());
        }
        return Err(format!(
            "AlreadyExistsException: Table {}.{} already exists",
            db, name
        ));
    }
    let rows = object.rows;
    tables.insert(name.to_string(), object);
    Ok(Effect {
        rows_affected: Some(rows),
        rows: Vec::new(),
    })
}

fn apply(st: &mut State, sql: &str, options: &ExecutionOptions) -> Result<Effect, String> {
    let p = patterns();

    if let Some(c) = p.create_database.captures(sql) {
        let name = c[2].to_string();
        if st.databases.contains_key(&name) && c.get(1).is_none() {
            return Err(format!("AlreadyExistsException: Database {} already exists", name));
        }
        st.databases.entry(name).or_default();
        return Ok(Effect::none());
    }

    if let Some(c) = p.create_external.captures(sql) {
        let db = resolve_db(st, c.get(2), options)?;
        let name = c[3].to_string();
        let rows = st.raw_rows.get(&name).copied().unwrap_or(0);
        return create_object(
            st,
            &db,
            &name,
            c.get(1).is_some(),
            CatalogObject {
                kind: ObjectKind::ExternalTable,
                rows,
            },
        );
    }

    if let Some(c) = p.create_table.captures(sql) {
        let db = resolve_db(st, c.get(2), options)?;
        let name = c[3].to_string();
        let if_not_exists = c.get(1).is_some();
        if if_not_exists && st.databases[&db].contains_key(&name) {
            return Ok(Effect::none());
        }
        let rows = match p.ctas_source.captures(sql) {
            Some(src) => source_rows(st, src.get(1), &src[2], options)?,
            None => 0,
        };
        return create_object(
            st,
            &db,
            &name,
            if_not_exists,
            CatalogObject {
                kind: ObjectKind::Table,
                rows,
            },
        );
    }

    if let Some(c) = p.create_view.captures(sql) {
        let db = resolve_db(st, c.get(1), options)?;
        st.databases.entry(db).or_default().insert(
            c[2].to_string(),
            CatalogObject {
                kind: ObjectKind::View,
                rows: 0,
            },
        );
        return Ok(Effect::none());
    }

    if let Some(c) = p.insert.captures(sql) {
        let added = source_rows(st, c.get(3), &c[4], options)?;
        let db = resolve_db(st, c.get(1), options)?;
        let target = c[2].to_string();
        let entry = st
            .databases
            .get_mut(&db)
            .and_then(|t| t.get_mut(&target))
            .ok_or_else(|| format!("TABLE_NOT_FOUND: Table {}.{} does not exist", db, target))?;
        if entry.kind == ObjectKind::View {
            return Err(format!("NOT_SUPPORTED: Cannot insert into view {}", target));
        }
        entry.rows += added;
        return Ok(Effect {
            rows_affected: Some(added),
            rows: Vec::new(),
        });
    }

    if let Some(c) = p.show_tables.captures(sql) {
        let db = resolve_db(st, c.get(1), options)?;
        let rows = match &st.listing {
            Some(listing) => listing.iter().map(|name| Row::text(&[name.as_str()])).collect(),
            None => st.databases[&db]
                .keys()
                .map(|name| Row::text(&[name.as_str()]))
                .collect(),
        };
        return Ok(Effect {
            rows_affected: None,
            rows,
        });
    }

    Err(format!(
        "NOT_SUPPORTED: unrecognized statement: {}",
        sql.trim_start().lines().next().unwrap_or("")
    ))
}
