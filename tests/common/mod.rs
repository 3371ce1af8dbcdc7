//! Shared fixtures: an in-memory repository holding a small work, and builders wired to it.
#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use work_presentation::generator::{ContentGenerator, DcContentGenerator};
use work_presentation::repository::MemoryRepository;
use work_presentation::{
    Content, GeneratorError, GeneratorPool, ParallelCacheBuilder, PresentationBuilder, QueueJob,
    Timestamp,
};

pub const WORK: &str = "work:1";
pub const UNIT_1: &str = "unit:1";
pub const UNIT_2: &str = "unit:2";
pub const OBJ_1: &str = "870970-basis:1";
pub const OBJ_2: &str = "870970-basis:2";
pub const STREAM: &str = "localData.870970";
pub const M1: &str = "870970:1";
pub const M2: &str = "870970:2";

pub fn ts(secs: i64) -> Timestamp {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// A Dublin Core record as the generator reads it.
pub fn dc_record(title: &str, creator: &str, subjects: &[&str], material_type: &str) -> String {
    let subjects: String = subjects
        .iter()
        .map(|s| format!("<dc:subject>{s}</dc:subject>"))
        .collect();
    format!(
        r#"<oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
<dc:title>{title}</dc:title>
<dc:creator xsi:type="aut">{creator}</dc:creator>
{subjects}
<dc:type>{material_type}</dc:type>
</oai_dc:dc>"#
    )
}

/// Work `W` with primary unit `U1` (primary object `O1` owning `M1`) and unit `U2` (object `O2` owning `M2`).
pub fn scenario_repository() -> Arc<MemoryRepository> {
    let repo = MemoryRepository::new();
    repo.add_work(WORK, ts(0));
    repo.add_unit(WORK, UNIT_1, true, ts(0));
    repo.add_object(UNIT_1, OBJ_1, true, ts(10));
    repo.put_stream(
        OBJ_1,
        STREAM,
        &dc_record("Troldmandens lærling", "Jane Author", &["Magi"], "Bog"),
    );
    repo.add_unit(WORK, UNIT_2, false, ts(0));
    repo.add_object(UNIT_2, OBJ_2, true, ts(20));
    repo.put_stream(
        OBJ_2,
        STREAM,
        &dc_record("The Sorcerer's Apprentice", "Jane Author", &["magi", "Heste"], "Lydbog"),
    );
    Arc::new(repo)
}

/// Adds a unit outside the work with one review manifestation, related from `UNIT_1`.
pub fn add_review(repo: &MemoryRepository) {
    repo.add_work("work:2", ts(0));
    repo.add_unit("work:2", "unit:3", true, ts(0));
    repo.add_object("unit:3", "870976-anmeld:3", true, ts(30));
    repo.put_stream(
        "870976-anmeld:3",
        "localData.870976",
        &dc_record("Anmeldelse", "Critic", &[], "Artikel"),
    );
    repo.add_relation(UNIT_1, work_presentation::RelationType::HasReview, "unit:3");
}

pub fn job(work_id: &str) -> QueueJob {
    QueueJob::new(work_id, "test")
}

/// Counts generations and can be told to break on a manifestation.
pub struct ScriptedGenerator {
    inner: DcContentGenerator,
    calls: Arc<AtomicUsize>,
    break_on: Option<String>,
}

impl ContentGenerator for ScriptedGenerator {
    fn generate(
        &mut self,
        manifestation_id: &str,
        streams: &HashMap<String, String>,
    ) -> Result<Content, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.break_on.as_deref() == Some(manifestation_id) {
            return Err(GeneratorError::Broken(format!("crashed on {manifestation_id}")));
        }
        self.inner.generate(manifestation_id, streams)
    }
}

pub fn generator_pool(size: usize, calls: Arc<AtomicUsize>, break_on: Option<&str>) -> GeneratorPool {
    let break_on = break_on.map(str::to_string);
    GeneratorPool::new(size, move || {
        Ok(Box::new(ScriptedGenerator {
            inner: DcContentGenerator::new(),
            calls: Arc::clone(&calls),
            break_on: break_on.clone(),
        }) as Box<dyn ContentGenerator>)
    })
}

/// Builder over `repo` with a 2-object pool and 4 regeneration threads. The db path is only used
/// by `JobProcessor::process`; tests calling `run_job` pass their own connection.
pub fn presentation_builder(
    repo: Arc<MemoryRepository>,
    calls: Arc<AtomicUsize>,
    db_path: &std::path::Path,
) -> PresentationBuilder {
    let cache_builder =
        ParallelCacheBuilder::with_threads(Arc::new(generator_pool(2, calls, None)), 4).unwrap();
    PresentationBuilder::new(repo, cache_builder, db_path)
}
