//! Query evaluation and field projection.

use serde::Serialize;

use super::manager::Queue;
use super::retry::with_retry;
use super::sqlite::tags;
use super::types::{format_timestamp, JobSet};
use crate::error::{Result, SchedError};
use crate::protocol::JobRecord;
use crate::query::{self, Predicate, QueryExpr};

/// Projected rows, one cell per requested field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub fields: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
enum Column {
    Id,
    Status,
    TimeSubmit,
    TimeRun,
    TimeDone,
    Timeout,
    RunTimeout,
    RunCounter,
    RetCode,
    Input,
    Output,
    ErrMsg,
    ProgressMsg,
    Affinity,
    Mask,
    Worker,
    Tag(String),
}

impl Column {
    fn parse(name: &str) -> Result<Self> {
        let column = match name.to_ascii_lowercase().as_str() {
            "id" => Column::Id,
            "status" => Column::Status,
            "time_submit" => Column::TimeSubmit,
            "time_run" => Column::TimeRun,
            "time_done" => Column::TimeDone,
            "timeout" => Column::Timeout,
            "run_timeout" => Column::RunTimeout,
            "run_counter" => Column::RunCounter,
            "ret_code" => Column::RetCode,
            "input" => Column::Input,
            "output" => Column::Output,
            "err_msg" => Column::ErrMsg,
            "progress_msg" => Column::ProgressMsg,
            "affinity" => Column::Affinity,
            "mask" => Column::Mask,
            "worker" => Column::Worker,
            lower => match lower.strip_prefix("tag.") {
                Some(_) if name.len() > 4 => Column::Tag(name[4..].to_string()),
                _ => {
                    return Err(SchedError::syntax(0, format!("unknown field '{}'", name)));
                }
            },
        };
        Ok(column)
    }
}

impl Queue {
    /// Evaluate a selection expression to the set of matching live jobs.
    pub fn exec_select(&self, expr: &str) -> Result<JobSet> {
        self.ensure_alive()?;
        let parsed = query::parse(expr)?;
        let universe = self.status.all_jobs();
        let mut selected = self.eval(&parsed, &universe)?;
        // Jobs reaped or erased during evaluation are dropped.
        selected.intersect_with(&self.status.all_jobs());
        Ok(selected)
    }

    fn eval(&self, expr: &QueryExpr, universe: &JobSet) -> Result<JobSet> {
        Ok(match expr {
            QueryExpr::Leaf(predicate) => self.resolve(predicate, universe)?,
            QueryExpr::Not(inner) => {
                let mut all = universe.clone();
                all.subtract(&self.eval(inner, universe)?);
                all
            }
            QueryExpr::And(a, b) => {
                let mut left = self.eval(a, universe)?;
                left.intersect_with(&self.eval(b, universe)?);
                left
            }
            QueryExpr::Or(a, b) => {
                let mut left = self.eval(a, universe)?;
                left.union_with(&self.eval(b, universe)?);
                left
            }
            QueryExpr::Xor(a, b) => {
                let mut left = self.eval(a, universe)?;
                left.xor_with(&self.eval(b, universe)?);
                left
            }
            QueryExpr::Sub(a, b) => {
                let mut left = self.eval(a, universe)?;
                left.subtract(&self.eval(b, universe)?);
                left
            }
        })
    }

    fn resolve(&self, predicate: &Predicate, universe: &JobSet) -> Result<JobSet> {
        Ok(match predicate {
            Predicate::Any => universe.clone(),
            Predicate::Status(status) => self.status.snapshot_observed(*status),
            Predicate::Id(id) => {
                let mut set = JobSet::new();
                if universe.contains(*id) {
                    set.insert(*id);
                }
                set
            }
            Predicate::Tag { key, value } => with_retry(self.retry_bound, |_| {
                self.store
                    .read(|conn| tags::tag_jobs(conn, key, value.as_deref()))
            })
            .into_result()?,
        })
    }

    /// Materialize `fields` for every job in `jobs`, in id order.
    ///
    /// Field names: id, status, time_submit, time_run, time_done, timeout,
    /// run_timeout, run_counter, ret_code, input, output, err_msg,
    /// progress_msg, affinity, mask, worker (most recent) and `tag.<name>`.
    /// Jobs that vanished since selection are skipped.
    pub fn exec_project(&self, jobs: &JobSet, fields: &[&str]) -> Result<Projection> {
        self.ensure_alive()?;
        let columns = fields
            .iter()
            .map(|f| Column::parse(f))
            .collect::<Result<Vec<_>>>()?;

        let mut rows = Vec::with_capacity(jobs.len());
        for id in jobs.iter() {
            let Some(status) = self.status.observed(id) else {
                continue;
            };
            let Some(record) = self.load_job(id)? else {
                continue;
            };
            let row = columns
                .iter()
                .map(|column| self.cell(column, &record, status.as_str()))
                .collect();
            rows.push(row);
        }

        Ok(Projection {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            rows,
        })
    }

    fn cell(&self, column: &Column, job: &JobRecord, status: &str) -> String {
        match column {
            Column::Id => job.id.to_string(),
            Column::Status => status.to_string(),
            Column::TimeSubmit => format_timestamp(job.time_submit),
            Column::TimeRun => format_timestamp(job.time_run),
            Column::TimeDone => format_timestamp(job.time_done),
            Column::Timeout => job.timeout.to_string(),
            Column::RunTimeout => job.run_timeout.to_string(),
            Column::RunCounter => job.run_counter.to_string(),
            Column::RetCode => job.ret_code.to_string(),
            Column::Input => job.input.clone(),
            Column::Output => job.output.clone(),
            Column::ErrMsg => job.err_msg.clone(),
            Column::ProgressMsg => job.progress_msg.clone(),
            Column::Affinity => self
                .affinity
                .read()
                .token(job.aff_id)
                .unwrap_or_default()
                .to_string(),
            Column::Mask => job.mask.to_string(),
            Column::Worker => job.last_worker().unwrap_or_default().to_string(),
            Column::Tag(key) => job.tag(key).unwrap_or_default().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_names() {
        assert_eq!(Column::parse("TIME_DONE").unwrap(), Column::TimeDone);
        assert_eq!(
            Column::parse("tag.Owner").unwrap(),
            Column::Tag("Owner".to_string())
        );
        assert!(Column::parse("tag.").is_err());
        assert!(Column::parse("colour").is_err());
    }
}
