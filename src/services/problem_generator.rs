//! Problem batches: draw references from each selected subject's pool, fetch them
//! concurrently, and keep whatever came back.

use std::{error::Error, sync::Arc, time::Duration};

use futures::future::{BoxFuture, join_all};
use rand::{Rng, seq::SliceRandom};
use serde::Deserialize;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{
    config::AppConfig,
    dao::models::ContestConfigEntity,
    services::renderer::ContentRenderer,
    state::contest::{AnswerKind, CanonicalAnswer, SubjectId},
};

/// Raw problem content as delivered by a [`ProblemSource`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FetchedProblem {
    #[serde(rename = "problem")]
    pub body: String,
    pub answer: CanonicalAnswer,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("problem `{reference}` not found")]
    NotFound { reference: String },
    #[error("request for problem `{reference}` failed")]
    Request {
        reference: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("problem `{reference}` was not fetched within {timeout:?}")]
    Timeout { reference: String, timeout: Duration },
}

/// Where problem bodies and answers come from.
pub trait ProblemSource: Send + Sync {
    fn fetch(&self, reference: &str) -> BoxFuture<'static, Result<FetchedProblem, SourceError>>;
}

/// Fetches `GET {base_url}/{reference}` and expects `{"problem": "...", "answer": ...}`.
#[cfg(feature = "http-source")]
#[derive(Clone)]
pub struct HttpProblemSource {
    client: reqwest::Client,
    base_url: Arc<str>,
}

#[cfg(feature = "http-source")]
impl HttpProblemSource {
    pub fn new(base_url: &str) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url: Arc::from(base_url.trim_end_matches('/')),
        })
    }
}

#[cfg(feature = "http-source")]
impl ProblemSource for HttpProblemSource {
    fn fetch(&self, reference: &str) -> BoxFuture<'static, Result<FetchedProblem, SourceError>> {
        let source = self.clone();
        let reference = reference.to_string();
        Box::pin(async move {
            let url = format!("{}/{}", source.base_url, reference);
            let request_failed = |err: reqwest::Error| SourceError::Request {
                reference: reference.clone(),
                source: Box::new(err),
            };

            let response = source.client.get(url).send().await.map_err(request_failed)?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(SourceError::NotFound {
                    reference: reference.clone(),
                });
            }
            response
                .error_for_status()
                .map_err(request_failed)?
                .json::<FetchedProblem>()
                .await
                .map_err(request_failed)
        })
    }
}

/// Source used when no problem backend is configured; every reference is missing.
pub struct UnconfiguredSource;

impl ProblemSource for UnconfiguredSource {
    fn fetch(&self, reference: &str) -> BoxFuture<'static, Result<FetchedProblem, SourceError>> {
        let reference = reference.to_string();
        Box::pin(async move { Err(SourceError::NotFound { reference }) })
    }
}

/// Parsed problem reference such as `2019_AMC_10A_Problems/Problem_5`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemRef {
    pub year: u16,
    pub contest: String,
    pub index: u32,
}

impl ProblemRef {
    pub fn parse(reference: &str) -> Option<Self> {
        let (set, problem) = reference.split_once('/')?;
        let index = problem.strip_prefix("Problem_")?.parse().ok()?;
        let (year, contest) = set.strip_suffix("_Problems")?.split_once('_')?;
        if contest.is_empty() {
            return None;
        }
        Some(Self {
            year: year.parse().ok()?,
            contest: contest.replace('_', " "),
            index,
        })
    }

    /// Display title, e.g. `2019 AMC 10A #5`.
    pub fn title(&self) -> String {
        format!("{} {} #{}", self.year, self.contest, self.index)
    }
}

/// A problem ready to be played: public half plus withheld answer.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedProblem {
    pub subject: SubjectId,
    pub reference: String,
    pub title: String,
    pub body: String,
    pub answer: CanonicalAnswer,
    pub answer_kind: AnswerKind,
    pub difficulty: f64,
}

/// One reference drawn from a subject pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draw {
    pub subject: SubjectId,
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("generated {produced} of {requested} requested problems")]
pub struct PartialGenerationFailure {
    pub requested: usize,
    pub produced: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProblemBatch {
    pub problems: Vec<GeneratedProblem>,
    pub requested: usize,
}

impl ProblemBatch {
    pub fn failed(&self) -> usize {
        self.requested.saturating_sub(self.problems.len())
    }

    pub fn shortfall(&self) -> Option<PartialGenerationFailure> {
        (self.failed() > 0).then_some(PartialGenerationFailure {
            requested: self.requested,
            produced: self.problems.len(),
        })
    }
}

/// Stable sort by difficulty; equal estimates keep generation order.
pub fn sort_easiest_first(problems: &mut [GeneratedProblem]) {
    problems.sort_by(|a, b| a.difficulty.total_cmp(&b.difficulty));
}

#[derive(Clone)]
pub struct ProblemBatchGenerator {
    catalog: Arc<AppConfig>,
    source: Arc<dyn ProblemSource>,
    renderer: Arc<dyn ContentRenderer>,
    fetch_timeout: Duration,
}

impl ProblemBatchGenerator {
    pub fn new(
        catalog: Arc<AppConfig>,
        source: Arc<dyn ProblemSource>,
        renderer: Arc<dyn ContentRenderer>,
    ) -> Self {
        let fetch_timeout = catalog.fetch_timeout();
        Self {
            catalog,
            source,
            renderer,
            fetch_timeout,
        }
    }

    /// Shuffle each selected pool and take `problem_count` references from it.
    pub fn draw<R: Rng + ?Sized>(&self, contest: &ContestConfigEntity, rng: &mut R) -> Vec<Draw> {
        let mut draws = Vec::new();
        for (id, settings) in contest.selected() {
            let Some(subject) = self.catalog.subject(id) else {
                warn!(subject = %id, "selected subject is missing from the catalog");
                continue;
            };
            let mut pool = subject.pool.clone();
            pool.shuffle(rng);
            pool.truncate(settings.problem_count as usize);
            draws.extend(pool.into_iter().map(|reference| Draw {
                subject: id.clone(),
                reference,
            }));
        }
        draws
    }

    pub async fn generate(&self, contest: &ContestConfigEntity) -> ProblemBatch {
        let draws = {
            let mut rng = rand::rng();
            self.draw(contest, &mut rng)
        };
        self.materialize(draws).await
    }

    /// Fetch every draw concurrently; failures are logged and dropped.
    pub async fn materialize(&self, draws: Vec<Draw>) -> ProblemBatch {
        let requested = draws.len();
        let problems = join_all(draws.into_iter().map(|draw| self.fetch_one(draw)))
            .await
            .into_iter()
            .flatten()
            .collect();

        let batch = ProblemBatch {
            problems,
            requested,
        };
        match batch.shortfall() {
            Some(shortfall) => warn!(error = %shortfall, "problem batch came back short"),
            None => debug!(requested, "problem batch complete"),
        }
        batch
    }

    async fn fetch_one(&self, draw: Draw) -> Option<GeneratedProblem> {
        let Some(parsed) = ProblemRef::parse(&draw.reference) else {
            warn!(reference = %draw.reference, "unparseable problem reference; dropping");
            return None;
        };
        let Some(subject) = self.catalog.subject(&draw.subject) else {
            warn!(subject = %draw.subject, "subject vanished from the catalog; dropping");
            return None;
        };
        let difficulty = subject.difficulty.estimate(parsed.index);

        let fetched = match timeout(self.fetch_timeout, self.source.fetch(&draw.reference)).await
        {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(err)) => {
                warn!(error = %err, "problem fetch failed; dropping");
                return None;
            }
            Err(_) => {
                let err = SourceError::Timeout {
                    reference: draw.reference,
                    timeout: self.fetch_timeout,
                };
                warn!(error = %err, "problem fetch failed; dropping");
                return None;
            }
        };

        let answer = match subject.answer_kind {
            AnswerKind::Integer => fetched.answer.normalize_integer(),
            AnswerKind::MultipleChoice => fetched.answer,
        };

        Some(GeneratedProblem {
            subject: draw.subject,
            title: parsed.title(),
            body: self.renderer.sanitize(&fetched.body),
            reference: draw.reference,
            answer,
            answer_kind: subject.answer_kind,
            difficulty,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{HashMap, HashSet};

    use indexmap::IndexMap;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        config::{DifficultyCurve, SubjectConfig},
        dao::models::SubjectSettingsEntity,
        services::renderer::MarkupSanitizer,
        state::contest::Scalar,
    };

    /// In-memory source: every reference resolves unless listed as failing or hanging.
    #[derive(Default)]
    pub(crate) struct StaticSource {
        pub failing: HashSet<String>,
        pub hanging: HashSet<String>,
        pub answers: HashMap<String, CanonicalAnswer>,
    }

    impl ProblemSource for StaticSource {
        fn fetch(&self, reference: &str) -> BoxFuture<'static, Result<FetchedProblem, SourceError>> {
            let reference = reference.to_string();
            if self.hanging.contains(&reference) {
                return Box::pin(futures::future::pending());
            }
            let result = if self.failing.contains(&reference) {
                Err(SourceError::NotFound { reference })
            } else {
                let answer = self
                    .answers
                    .get(&reference)
                    .cloned()
                    .unwrap_or(CanonicalAnswer::One(Scalar::Text("A".into())));
                Ok(FetchedProblem {
                    body: format!("<p>{reference}</p>"),
                    answer,
                })
            };
            Box::pin(async move { result })
        }
    }

    fn refs(contest: &str, count: u32) -> Vec<String> {
        (1..=count)
            .map(|n| format!("2019_{contest}_Problems/Problem_{n}"))
            .collect()
    }

    fn catalog() -> AppConfig {
        let subject = |kind, pool| SubjectConfig {
            display_name: "test".into(),
            answer_kind: kind,
            default_problem_count: 0,
            correct_score: 6.0,
            blank_score: 1.5,
            difficulty: DifficultyCurve {
                base: 1.0,
                step: 1.0,
            },
            pool,
        };
        AppConfig {
            subjects: IndexMap::from([
                (
                    SubjectId::new("amc10"),
                    subject(AnswerKind::MultipleChoice, refs("AMC_10A", 25)),
                ),
                (
                    SubjectId::new("aime"),
                    subject(AnswerKind::Integer, refs("AIME_I", 15)),
                ),
            ]),
            ..AppConfig::default()
        }
    }

    fn contest(counts: &[(&str, u32)]) -> ContestConfigEntity {
        ContestConfigEntity {
            subjects: counts
                .iter()
                .map(|(id, count)| {
                    (
                        SubjectId::new(*id),
                        SubjectSettingsEntity {
                            selected: true,
                            problem_count: *count,
                            correct_score: 6.0,
                            blank_score: 1.5,
                        },
                    )
                })
                .collect(),
        }
    }

    fn generator(source: StaticSource) -> ProblemBatchGenerator {
        ProblemBatchGenerator::new(
            Arc::new(catalog()),
            Arc::new(source),
            Arc::new(MarkupSanitizer),
        )
    }

    fn draw(subject: &str, reference: &str) -> Draw {
        Draw {
            subject: SubjectId::new(subject),
            reference: reference.to_string(),
        }
    }

    #[test]
    fn references_parse_into_titles() {
        let parsed = ProblemRef::parse("2019_AMC_10A_Problems/Problem_5").unwrap();
        assert_eq!(parsed.year, 2019);
        assert_eq!(parsed.index, 5);
        assert_eq!(parsed.title(), "2019 AMC 10A #5");
        assert_eq!(
            ProblemRef::parse("2021_AIME_II_Problems/Problem_15")
                .unwrap()
                .title(),
            "2021 AIME II #15"
        );
        assert!(ProblemRef::parse("2019_AMC_10A_Problems").is_none());
        assert!(ProblemRef::parse("nonsense/Problem_x").is_none());
    }

    #[test]
    fn draws_take_distinct_prefixes_of_selected_pools() {
        let generator = generator(StaticSource::default());
        let mut contest = contest(&[("amc10", 4), ("aime", 3)]);
        contest.subjects.insert(
            SubjectId::new("amc12"),
            SubjectSettingsEntity {
                selected: false,
                problem_count: 5,
                correct_score: 6.0,
                blank_score: 1.5,
            },
        );
        let mut rng = StdRng::seed_from_u64(7);

        let draws = generator.draw(&contest, &mut rng);

        assert_eq!(draws.len(), 7);
        assert!(draws[..4].iter().all(|d| d.subject.as_str() == "amc10"));
        assert!(draws[4..].iter().all(|d| d.subject.as_str() == "aime"));
        let unique: HashSet<_> = draws.iter().map(|d| &d.reference).collect();
        assert_eq!(unique.len(), 7);
    }

    #[test]
    fn seeded_draws_are_reproducible() {
        let generator = generator(StaticSource::default());
        let contest = contest(&[("amc10", 5)]);
        let first = generator.draw(&contest, &mut StdRng::seed_from_u64(42));
        let second = generator.draw(&contest, &mut StdRng::seed_from_u64(42));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn one_failure_out_of_five_yields_four() {
        let failing = "2019_AMC_10A_Problems/Problem_3".to_string();
        let generator = generator(StaticSource {
            failing: HashSet::from([failing.clone()]),
            ..StaticSource::default()
        });
        let draws = (1..=5)
            .map(|n| draw("amc10", &format!("2019_AMC_10A_Problems/Problem_{n}")))
            .collect();

        let batch = generator.materialize(draws).await;

        assert_eq!(batch.requested, 5);
        assert_eq!(batch.problems.len(), 4);
        assert!(batch.problems.iter().all(|p| p.reference != failing));
        assert_eq!(
            batch.shortfall(),
            Some(PartialGenerationFailure {
                requested: 5,
                produced: 4
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetches_are_dropped() {
        let hanging = "2019_AMC_10A_Problems/Problem_2".to_string();
        let generator = generator(StaticSource {
            hanging: HashSet::from([hanging.clone()]),
            ..StaticSource::default()
        });

        let batch = generator
            .materialize(vec![
                draw("amc10", "2019_AMC_10A_Problems/Problem_1"),
                draw("amc10", &hanging),
            ])
            .await;

        assert_eq!(batch.problems.len(), 1);
        assert_eq!(batch.failed(), 1);
    }

    #[tokio::test]
    async fn unparseable_references_are_dropped() {
        let generator = generator(StaticSource::default());
        let batch = generator
            .materialize(vec![
                draw("amc10", "not-a-reference"),
                draw("amc10", "2019_AMC_10A_Problems/Problem_9"),
            ])
            .await;
        assert_eq!(batch.problems.len(), 1);
        assert_eq!(batch.problems[0].title, "2019 AMC 10A #9");
        assert_eq!(batch.problems[0].difficulty, 9.0);
    }

    #[tokio::test]
    async fn integer_subjects_normalize_answers_and_bodies_are_sanitized() {
        let reference = "2019_AIME_I_Problems/Problem_4".to_string();
        let generator = generator(StaticSource {
            answers: HashMap::from([(
                reference.clone(),
                CanonicalAnswer::One(Scalar::Text("029".into())),
            )]),
            ..StaticSource::default()
        });

        let batch = generator.materialize(vec![draw("aime", &reference)]).await;

        let problem = &batch.problems[0];
        assert_eq!(problem.answer, CanonicalAnswer::One(Scalar::Integer(29)));
        assert_eq!(problem.answer_kind, AnswerKind::Integer);
        assert_eq!(problem.body, format!("<p>{reference}</p>"));
    }

    #[test]
    fn sorting_is_stable_on_equal_difficulty() {
        let problem = |reference: &str, difficulty| GeneratedProblem {
            subject: SubjectId::new("amc10"),
            reference: reference.into(),
            title: reference.into(),
            body: String::new(),
            answer: CanonicalAnswer::One(Scalar::Integer(1)),
            answer_kind: AnswerKind::MultipleChoice,
            difficulty,
        };
        let mut problems = vec![
            problem("hard", 3.0),
            problem("first-easy", 1.0),
            problem("mid", 2.0),
            problem("second-easy", 1.0),
        ];

        sort_easiest_first(&mut problems);

        let order: Vec<_> = problems.iter().map(|p| p.reference.as_str()).collect();
        assert_eq!(order, ["first-easy", "second-easy", "mid", "hard"]);
    }
}
