//! Collection pipeline: windows → sources → candidates → article records.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use arrow_array::{ArrayRef, BooleanArray, Float64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::discovery::SourcePlan;
use crate::error::AppError;
use crate::models::{
    ArticleRecord, CandidateLink, EventWindow, FetchResult, FetchStatus, ParseStatus,
};
use crate::relevance::RelevanceFilter;
use crate::traits::{ContentExtractor, Fetcher, LinkDiscovery};
use crate::urls::canonicalize_url;

const ARTICLE_COLUMNS: [&str; 13] = [
    "source",
    "url",
    "canonical_url",
    "title",
    "published_at",
    "text",
    "summary",
    "event_date_time",
    "event_decision",
    "event_new_rate",
    "fetch_status",
    "parse_status",
    "relevance",
];

/// Runs discovery, fetch, extraction and relevance for every window and
/// source plan.
///
/// Generic over the network-facing pieces so the pipeline can be driven by
/// mocks in tests.
pub struct Collector<F, X, D>
where
    F: Fetcher,
    X: ContentExtractor,
    D: LinkDiscovery,
{
    fetcher: F,
    extractor: X,
    discovery: D,
    relevance: RelevanceFilter,
    plans: Vec<SourcePlan>,
}

impl<F, X, D> Collector<F, X, D>
where
    F: Fetcher,
    X: ContentExtractor,
    D: LinkDiscovery,
{
    pub fn new(
        fetcher: F,
        extractor: X,
        discovery: D,
        relevance: RelevanceFilter,
        plans: Vec<SourcePlan>,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            discovery,
            relevance,
            plans,
        }
    }

    /// Collect records for all windows. Per-candidate failures end up in the
    /// record's status fields; nothing here aborts the run.
    pub async fn collect(&self, windows: &[EventWindow]) -> Vec<ArticleRecord> {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut records = Vec::new();

        for window in windows {
            tracing::info!(
                event = %window.event.event_date_time,
                start = %window.start,
                end = %window.end,
                "Processing event window"
            );

            for plan in &self.plans {
                let candidates = self.discovery.discover(&plan.discovery, window).await;
                let candidate_count = candidates.len();
                let before = records.len();

                for candidate in candidates {
                    if let Some(record) =
                        self.process_candidate(plan, candidate, window, &mut seen).await
                    {
                        records.push(record);
                    }
                }

                let produced = &records[before..];
                tracing::info!(
                    source = %plan.name,
                    kind = plan.discovery.kind(),
                    candidates = candidate_count,
                    records = produced.len(),
                    relevant = produced.iter().filter(|r| r.relevance).count(),
                    "Source done"
                );
            }
        }

        tracing::info!(
            records = records.len(),
            relevant = records.iter().filter(|r| r.relevance).count(),
            "Collection finished"
        );
        records
    }

    async fn process_candidate(
        &self,
        plan: &SourcePlan,
        candidate: CandidateLink,
        window: &EventWindow,
        seen: &mut HashSet<(String, String)>,
    ) -> Option<ArticleRecord> {
        if !plan.filter.allows(&candidate.url) {
            tracing::trace!(url = %candidate.url, "Filtered out");
            return None;
        }

        let canonical = canonicalize_url(&candidate.url);
        if !seen.insert((plan.name.clone(), canonical.clone())) {
            tracing::trace!(url = %canonical, "Already seen");
            return None;
        }

        let fetched = self.fetcher.fetch(&candidate.url).await;
        Some(self.assemble(plan, candidate, canonical, &fetched, window))
    }

    fn assemble(
        &self,
        plan: &SourcePlan,
        candidate: CandidateLink,
        canonical_url: String,
        fetched: &FetchResult,
        window: &EventWindow,
    ) -> ArticleRecord {
        let fetch_status = if fetched.is_robots_denied() {
            FetchStatus::RobotsDisallow
        } else if fetched.body().is_some() {
            FetchStatus::Ok
        } else {
            if let Some(error) = &fetched.error {
                tracing::warn!(url = %fetched.url, status = ?fetched.status_code, %error, "Fetch failed");
            }
            FetchStatus::Error
        };

        let extracted = fetched.body().map(|html| self.extractor.extract(html));

        let (title, published_at, text, parse_status) = match extracted {
            Some(ex) => (
                ex.title.or(candidate.title),
                ex.published_at.or(candidate.published_at),
                ex.text,
                ex.parse_status,
            ),
            None => {
                let status = if fetch_status == FetchStatus::RobotsDisallow {
                    ParseStatus::RobotsDisallow
                } else {
                    ParseStatus::NoHtml
                };
                (candidate.title, candidate.published_at, None, status)
            }
        };

        let relevance = if title.is_some() || text.is_some() {
            self.relevance
                .is_relevant(title.as_deref(), text.as_deref())
        } else {
            false
        };

        ArticleRecord {
            source: plan.name.clone(),
            url: candidate.url,
            canonical_url,
            title,
            published_at,
            text,
            summary: candidate.summary,
            event_date_time: window.event.event_date_time.to_iso(),
            event_decision: window.event.decision.clone(),
            event_new_rate: window.event.new_rate,
            fetch_status,
            parse_status,
            relevance,
        }
    }
}

/// Collection output format, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Jsonl,
    Parquet,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "jsonl" => Ok(OutputFormat::Jsonl),
            "parquet" => Ok(OutputFormat::Parquet),
            other => Err(AppError::ConfigError(format!(
                "Unsupported output type '.{other}' (expected .csv, .jsonl or .parquet): {}",
                path.display()
            ))),
        }
    }
}

/// Write all records to `path`, creating parent directories.
pub fn write_records(path: &Path, records: &[ArticleRecord]) -> Result<(), AppError> {
    let format = OutputFormat::from_path(path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    match format {
        OutputFormat::Csv => {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_path(path)?;
            writer.write_record(ARTICLE_COLUMNS)?;
            for record in records {
                writer.serialize(record)?;
            }
            writer.flush()?;
        }
        OutputFormat::Jsonl => {
            let mut writer = BufWriter::new(File::create(path)?);
            for record in records {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        OutputFormat::Parquet => write_parquet(path, records)?,
    }

    tracing::info!(path = %path.display(), count = records.len(), "Wrote records");
    Ok(())
}

fn parquet_error(e: impl std::fmt::Display) -> AppError {
    AppError::IoError(format!("Parquet: {e}"))
}

/// One snappy-compressed row group with the same columns as the CSV output.
fn write_parquet(path: &Path, records: &[ArticleRecord]) -> Result<(), AppError> {
    let text = |name: &str| Field::new(name, DataType::Utf8, false);
    let optional_text = |name: &str| Field::new(name, DataType::Utf8, true);
    let schema = Arc::new(Schema::new(vec![
        text("source"),
        text("url"),
        text("canonical_url"),
        optional_text("title"),
        optional_text("published_at"),
        optional_text("text"),
        optional_text("summary"),
        text("event_date_time"),
        optional_text("event_decision"),
        Field::new("event_new_rate", DataType::Float64, true),
        text("fetch_status"),
        text("parse_status"),
        Field::new("relevance", DataType::Boolean, false),
    ]));

    let strings = |f: fn(&ArticleRecord) -> Option<&str>| -> ArrayRef {
        Arc::new(records.iter().map(f).collect::<StringArray>())
    };
    let columns: Vec<ArrayRef> = vec![
        strings(|r| Some(r.source.as_str())),
        strings(|r| Some(r.url.as_str())),
        strings(|r| Some(r.canonical_url.as_str())),
        strings(|r| r.title.as_deref()),
        strings(|r| r.published_at.as_deref()),
        strings(|r| r.text.as_deref()),
        strings(|r| r.summary.as_deref()),
        strings(|r| Some(r.event_date_time.as_str())),
        strings(|r| r.event_decision.as_deref()),
        Arc::new(records.iter().map(|r| r.event_new_rate).collect::<Float64Array>()),
        strings(|r| Some(r.fetch_status.as_str())),
        strings(|r| Some(r.parse_status.as_str())),
        Arc::new(records.iter().map(|r| Some(r.relevance)).collect::<BooleanArray>()),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns).map_err(parquet_error)?;

    let properties = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer =
        ArrowWriter::try_new(File::create(path)?, schema, Some(properties)).map_err(parquet_error)?;
    writer.write(&batch).map_err(parquet_error)?;
    writer.close().map_err(parquet_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TagPageOptions;
    use crate::dates::Timestamp;
    use crate::discovery::Discovery;
    use crate::models::{Event, FetchOrigin};
    use crate::relevance::RelevanceConfig;
    use crate::testutil::*;
    use crate::urls::UrlFilter;

    const RELEVANT_HTML: &str =
        "ЦБ повысил ключевую ставку. Совет директоров Банка России принял решение.";

    fn relevance() -> RelevanceFilter {
        RelevanceFilter::new(&RelevanceConfig {
            keyrate_regex: r"ключев\w*\s+ставк\w*".into(),
            cbr_regex: r"(Банк\w*\s+России|ЦБ)".into(),
            decision_regex: r"(совет\s+директор|решени|повысил)".into(),
            cbr_lede_chars: 500,
        })
        .unwrap()
    }

    fn window(day: &str) -> EventWindow {
        let date: chrono::NaiveDate = day.parse().unwrap();
        EventWindow {
            event: Event {
                event_date_time: Timestamp::parse(day).unwrap(),
                decision: Some("raise".into()),
                new_rate: Some(18.0),
            },
            start: date,
            end: date,
        }
    }

    fn plan(name: &str, filter: UrlFilter) -> SourcePlan {
        SourcePlan::new(
            name,
            Discovery::TagPage(TagPageOptions {
                tag_url: "https://news.example/tags/rate/".into(),
                max_pages: 1,
            }),
            filter,
        )
    }

    fn collector(
        fetcher: MockFetcher,
        discovery: MockDiscovery,
        plans: Vec<SourcePlan>,
    ) -> Collector<MockFetcher, MockExtractor, MockDiscovery> {
        Collector::new(fetcher, MockExtractor::passthrough(), discovery, relevance(), plans)
    }

    #[tokio::test]
    async fn builds_relevant_record() {
        let url = "https://news.example/a/1?utm=x";
        let fetcher = MockFetcher::new().with_page(url, RELEVANT_HTML);
        let discovery =
            MockDiscovery::new(vec![CandidateLink::new(url).with_title("Заголовок")]);
        let records = collector(fetcher, discovery, vec![plan("news", UrlFilter::default())])
            .collect(&[window("2024-07-26")])
            .await;

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.canonical_url, "https://news.example/a/1");
        assert_eq!(record.fetch_status, FetchStatus::Ok);
        assert_eq!(record.parse_status, ParseStatus::Ok);
        assert_eq!(record.title.as_deref(), Some("Заголовок"));
        assert_eq!(record.event_decision.as_deref(), Some("raise"));
        assert!(record.relevance);
    }

    #[tokio::test]
    async fn dedupes_across_windows() {
        let fetcher = MockFetcher::new().with_page("https://news.example/a/1", RELEVANT_HTML);
        let discovery = MockDiscovery::new(vec![
            CandidateLink::new("https://news.example/a/1"),
            CandidateLink::new("https://NEWS.example/a/1#comments"),
        ]);
        let records = collector(
            fetcher.clone(),
            discovery,
            vec![plan("news", UrlFilter::default())],
        )
        .collect(&[window("2024-07-26"), window("2024-09-13")])
        .await;

        assert_eq!(records.len(), 1);
        assert_eq!(fetcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn same_url_under_two_sources_is_kept_twice() {
        let fetcher = MockFetcher::new().with_page("https://news.example/a/1", RELEVANT_HTML);
        let discovery = MockDiscovery::new(vec![CandidateLink::new("https://news.example/a/1")]);
        let records = collector(
            fetcher,
            discovery,
            vec![
                plan("first", UrlFilter::default()),
                plan("second", UrlFilter::default()),
            ],
        )
        .collect(&[window("2024-07-26")])
        .await;

        let sources: Vec<_> = records.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(sources, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn url_filter_runs_before_fetch() {
        let fetcher = MockFetcher::new();
        let discovery = MockDiscovery::new(vec![
            CandidateLink::new("https://other.example/x"),
            CandidateLink::new("https://news.example/video/1"),
        ]);
        let filter = UrlFilter::new(&["news.example".into()], &["/video/".into()]).unwrap();
        let records = collector(fetcher.clone(), discovery, vec![plan("news", filter)])
            .collect(&[window("2024-07-26")])
            .await;

        assert!(records.is_empty());
        assert!(fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn robots_denial_marks_both_statuses() {
        let url = "https://news.example/private/1";
        let fetcher = MockFetcher::new().with_result(url, FetchResult::robots_denied(url));
        let discovery = MockDiscovery::new(vec![
            CandidateLink::new(url).with_title("ЦБ повысил ключевую ставку, решение принято"),
        ]);
        let records = collector(fetcher, discovery, vec![plan("news", UrlFilter::default())])
            .collect(&[window("2024-07-26")])
            .await;

        let record = &records[0];
        assert_eq!(record.fetch_status, FetchStatus::RobotsDisallow);
        assert_eq!(record.parse_status, ParseStatus::RobotsDisallow);
        assert!(record.text.is_none());
        // Candidate title alone can still pass the gates.
        assert!(record.relevance);
    }

    #[tokio::test]
    async fn failed_fetch_without_title_is_irrelevant() {
        let url = "https://news.example/a/404";
        let fetcher =
            MockFetcher::new().with_result(url, FetchResult::failed(url, Some(404), "HTTP 404"));
        let discovery = MockDiscovery::new(vec![CandidateLink::new(url)]);
        let records = collector(fetcher, discovery, vec![plan("news", UrlFilter::default())])
            .collect(&[window("2024-07-26")])
            .await;

        let record = &records[0];
        assert_eq!(record.fetch_status, FetchStatus::Error);
        assert_eq!(record.parse_status, ParseStatus::NoHtml);
        assert!(!record.relevance);
    }

    #[tokio::test]
    async fn empty_body_is_error() {
        let url = "https://news.example/a/empty";
        let fetcher = MockFetcher::new().with_result(
            url,
            FetchResult::ok(url, 200, Vec::new(), FetchOrigin::Network),
        );
        let discovery = MockDiscovery::new(vec![CandidateLink::new(url)]);
        let records = collector(fetcher, discovery, vec![plan("news", UrlFilter::default())])
            .collect(&[window("2024-07-26")])
            .await;
        assert_eq!(records[0].fetch_status, FetchStatus::Error);
    }

    #[test]
    fn output_format_by_extension() {
        assert_eq!(
            OutputFormat::from_path(Path::new("out/a.CSV")).unwrap(),
            OutputFormat::Csv
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("a.jsonl")).unwrap(),
            OutputFormat::Jsonl
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("a.parquet")).unwrap(),
            OutputFormat::Parquet
        );
        assert!(matches!(
            OutputFormat::from_path(Path::new("a.xlsx")),
            Err(AppError::ConfigError(_))
        ));
    }

    fn sample_record() -> ArticleRecord {
        ArticleRecord {
            source: "news".into(),
            url: "https://news.example/a/1".into(),
            canonical_url: "https://news.example/a/1".into(),
            title: Some("Ставка, \"решение\"".into()),
            published_at: None,
            text: Some("Текст".into()),
            summary: None,
            event_date_time: "2024-07-26T13:30:00".into(),
            event_decision: None,
            event_new_rate: Some(18.0),
            fetch_status: FetchStatus::Ok,
            parse_status: ParseStatus::Ok,
            relevance: true,
        }
    }

    #[test]
    fn writes_csv_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.csv");
        write_records(&path, &[sample_record()]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, ARTICLE_COLUMNS);
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[3], "Ставка, \"решение\"");
        assert_eq!(&row[10], "ok");
        assert_eq!(&row[12], "true");
    }

    #[test]
    fn empty_csv_still_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_records(&path, &[]).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("source,url,canonical_url"));
    }

    #[test]
    fn writes_jsonl_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        write_records(&path, &[sample_record(), sample_record()]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["parse_status"], "ok");
        assert_eq!(value["published_at"], serde_json::Value::Null);
        assert!(lines[0].contains("Текст"));
    }

    #[test]
    fn writes_parquet_columns() {
        use arrow_array::Array;
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let mut second = sample_record();
        second.event_new_rate = None;
        second.relevance = false;
        write_records(&path, &[sample_record(), second]).unwrap();

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&path).unwrap())
            .unwrap()
            .build()
            .unwrap();
        let batches: Vec<RecordBatch> = reader.map(Result::unwrap).collect();
        assert_eq!(batches.iter().map(RecordBatch::num_rows).sum::<usize>(), 2);

        let batch = &batches[0];
        let names: Vec<String> = batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, ARTICLE_COLUMNS);

        let title = batch.column_by_name("title").unwrap();
        let title = title.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(title.value(0), "Ставка, \"решение\"");

        let rate = batch.column_by_name("event_new_rate").unwrap();
        let rate = rate.as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(rate.value(0), 18.0);
        assert!(rate.is_null(1));

        let relevance = batch.column_by_name("relevance").unwrap();
        let relevance = relevance.as_any().downcast_ref::<BooleanArray>().unwrap();
        assert!(relevance.value(0));
        assert!(!relevance.value(1));
    }
}
