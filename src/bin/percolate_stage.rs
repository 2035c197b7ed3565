use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::TryRecvError;
use percolate_stage::topology::DEFAULT_QUEUE_PER_WORKER;
use percolate_stage::tuple::SOURCE_FIELD;
use percolate_stage::{
    EsArgs, EsPercolateClient, MessageId, Signal, Topology, TopologyStats, Tuple,
};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "percolate-stage",
    about = "Percolate JSONL tuples against Elasticsearch and emit matching query ids"
)]
struct StageCli {
    /// JSONL tuples with `source`, `index`, and `type` fields (stdin when omitted)
    #[arg(long, env = "PERCOLATE_INPUT")]
    input: Option<PathBuf>,

    /// JSONL output of `{"id": ...}` records (stdout when omitted)
    #[arg(long, env = "PERCOLATE_OUTPUT")]
    output: Option<PathBuf>,

    /// Optional JSONL file collecting failed input lines
    #[arg(long, env = "PERCOLATE_DEAD_LETTER")]
    dead_letter: Option<PathBuf>,

    /// Number of percolate workers
    #[arg(long, env = "PERCOLATE_WORKERS", default_value_t = 1)]
    workers: usize,

    #[command(flatten)]
    es: EsArgs,
}

#[derive(Serialize)]
struct DeadLetter<'a> {
    message_id: MessageId,
    line: &'a str,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = StageCli::parse();
    let config = cli.es.build_config()?;
    let client = Arc::new(EsPercolateClient::new(&config)?);
    let nodes: Vec<&str> = client.nodes().iter().map(|u| u.as_str()).collect();
    info!(?nodes, api = ?config.api(), "percolate client ready");

    let reader: Box<dyn BufRead> = match &cli.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("failed to open {:?}", path))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let output: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("failed to create {:?}", path))?,
        ),
        None => Box::new(io::stdout()),
    };
    let dead_letter = match &cli.dead_letter {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {:?}", path))?,
        )),
        None => None,
    };

    let workers = cli.workers.max(1);
    let topology = Topology::spawn(client, workers, workers * DEFAULT_QUEUE_PER_WORKER)?;
    let mut sink = SignalSink::new(BufWriter::new(output), dead_letter);
    let summary = run(reader, topology, &mut sink)?;
    info!(
        acked = summary.stats.acked,
        failed = summary.stats.failed,
        malformed = summary.malformed,
        emitted = summary.stats.emitted,
        "percolate run complete"
    );
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RunSummary {
    stats: TopologyStats,
    malformed: usize,
}

/// Decodes one input line. An embedded object or array under `source` is
/// re-encoded as JSON text; every other field keeps its JSON type.
fn parse_line(message_id: MessageId, line: &str) -> serde_json::Result<Tuple> {
    let mut object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(line)?;
    if let Some(source) = object.get_mut(SOURCE_FIELD) {
        if source.is_object() || source.is_array() {
            *source = serde_json::Value::String(source.to_string());
        }
    }
    Ok(Tuple::from_json_object(message_id, object))
}

fn run<R, W, D>(
    reader: R,
    mut topology: Topology,
    sink: &mut SignalSink<W, D>,
) -> Result<RunSummary>
where
    R: BufRead,
    W: Write,
    D: Write,
{
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", line_no + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let message_id = line_no as MessageId + 1;
        match parse_line(message_id, &line) {
            Ok(tuple) => {
                sink.pending.insert(message_id, line);
                topology.submit(tuple)?;
            }
            Err(err) => {
                warn!(message_id, error = %err, "skipping line that is not a JSON object");
                sink.malformed += 1;
                sink.dead_letter(message_id, &line)?;
            }
        }
        loop {
            match topology.signals().try_recv() {
                Ok(signal) => sink.handle(signal)?,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    anyhow::bail!("percolate workers exited unexpectedly")
                }
            }
        }
    }

    topology.close_input();
    for signal in topology.signals().iter() {
        sink.handle(signal)?;
    }
    let stats = topology.finish()?;
    sink.output.flush()?;
    if let Some(dead_letter) = sink.dead_letter.as_mut() {
        dead_letter.flush()?;
    }
    Ok(RunSummary {
        stats,
        malformed: sink.malformed,
    })
}

struct SignalSink<W, D> {
    output: W,
    dead_letter: Option<D>,
    pending: HashMap<MessageId, String>,
    malformed: usize,
}

impl<W: Write, D: Write> SignalSink<W, D> {
    fn new(output: W, dead_letter: Option<D>) -> Self {
        Self {
            output,
            dead_letter,
            pending: HashMap::new(),
            malformed: 0,
        }
    }

    fn handle(&mut self, signal: Signal) -> Result<()> {
        match signal {
            Signal::Emit { record, .. } => {
                serde_json::to_writer(&mut self.output, &record)?;
                self.output.write_all(b"\n")?;
            }
            Signal::Ack(id) => {
                self.pending.remove(&id);
            }
            Signal::Fail(id) => {
                if let Some(line) = self.pending.remove(&id) {
                    self.dead_letter(id, &line)?;
                }
            }
            Signal::ReportError(message) => {
                warn!(error = %message, "worker reported error");
            }
        }
        Ok(())
    }

    fn dead_letter(&mut self, message_id: MessageId, line: &str) -> Result<()> {
        if let Some(writer) = self.dead_letter.as_mut() {
            serde_json::to_writer(&mut *writer, &DeadLetter { message_id, line })?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(true)
        .with_thread_names(true)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use percolate_stage::{MatchId, QueryError, SearchClient};

    /// `{"f":1}` matches two stored queries; `"boom"` fails like a dead cluster.
    struct StubClient;

    impl SearchClient for StubClient {
        fn execute_percolate(
            &self,
            _index: &str,
            _doc_type: &str,
            document: &str,
        ) -> Result<Vec<MatchId>, QueryError> {
            match document {
                r#"{"f":1}"# => Ok(vec![MatchId::from("q1"), MatchId::from("q2")]),
                "boom" => Err(QueryError::Transport("connection refused".into())),
                _ => Ok(Vec::new()),
            }
        }
    }

    fn run_lines(input: &str) -> (RunSummary, String, Vec<(MessageId, String)>) {
        let topology = Topology::spawn(Arc::new(StubClient), 2, 2).expect("spawn");
        let mut sink = SignalSink::new(Vec::new(), Some(Vec::new()));
        let summary = run(input.as_bytes(), topology, &mut sink).expect("run");
        let output = String::from_utf8(sink.output).expect("utf8 output");
        let dead = String::from_utf8(sink.dead_letter.unwrap_or_default()).expect("utf8 dead");
        let mut dead: Vec<(MessageId, String)> = dead
            .lines()
            .map(|line| {
                let letter: serde_json::Value =
                    serde_json::from_str(line).expect("dead letter json");
                (
                    letter["message_id"].as_u64().expect("message id"),
                    letter["line"].as_str().expect("original line").to_string(),
                )
            })
            .collect();
        dead.sort();
        (summary, output, dead)
    }

    #[test]
    fn matches_become_id_lines() {
        let (summary, output, dead) =
            run_lines(r#"{"source":"{\"f\":1}","index":"docs","type":"q"}"#);

        let mut ids: Vec<&str> = output.lines().collect();
        ids.sort();
        assert_eq!(ids, [r#"{"id":"q1"}"#, r#"{"id":"q2"}"#]);
        assert!(dead.is_empty());
        assert_eq!(summary.stats.acked, 1);
        assert_eq!(summary.stats.emitted, 2);
        assert_eq!(summary.malformed, 0);
    }

    #[test]
    fn failed_and_malformed_lines_are_dead_lettered() {
        let input = [
            r#"{"source":"boom","index":"docs","type":"q"}"#,
            "",
            r#"{"source":"{}","index":"docs"}"#,
            "not json",
            r#"{"source":"{}","index":"docs","type":"q"}"#,
        ]
        .join("\n");

        let (summary, output, dead) = run_lines(&input);

        assert!(output.is_empty());
        assert_eq!(
            dead,
            vec![
                (1, r#"{"source":"boom","index":"docs","type":"q"}"#.to_string()),
                (3, r#"{"source":"{}","index":"docs"}"#.to_string()),
                (4, "not json".to_string()),
            ]
        );
        assert_eq!(summary.stats.acked, 1);
        assert_eq!(summary.stats.failed, 2);
        assert_eq!(summary.malformed, 1);
    }

    #[test]
    fn embedded_object_source_is_sent_as_json_text() {
        let tuple = parse_line(9, r#"{"source":{"f":1},"index":"docs","type":"q"}"#)
            .expect("valid line");
        assert_eq!(
            tuple.get_string_by_field(SOURCE_FIELD).expect("string source"),
            r#"{"f":1}"#
        );

        let (summary, output, _) = run_lines(r#"{"source":{"f":1},"index":"docs","type":"q"}"#);
        assert_eq!(output.lines().count(), 2);
        assert_eq!(summary.stats.acked, 1);
    }

    #[test]
    fn embedded_object_index_still_fails() {
        let input = r#"{"source":"{}","index":{"name":"docs"},"type":"q"}"#;
        let (summary, output, dead) = run_lines(input);
        assert!(output.is_empty());
        assert_eq!(dead, vec![(1, input.to_string())]);
        assert_eq!(summary.stats.failed, 1);
    }
}
