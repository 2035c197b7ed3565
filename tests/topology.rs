use std::collections::HashMap;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use percolate_stage::{
    MatchId, OutputRecord, QueryError, SearchClient, Signal, Topology, TopologyStats, Tuple,
};

/// Matches documents by their literal text; `"boom"` simulates an unreachable cluster.
struct TableClient {
    answers: HashMap<&'static str, Vec<&'static str>>,
}

impl SearchClient for TableClient {
    fn execute_percolate(
        &self,
        index: &str,
        _doc_type: &str,
        document: &str,
    ) -> Result<Vec<MatchId>, QueryError> {
        assert_eq!(index, "docs");
        if document == "boom" {
            return Err(QueryError::Transport("connection reset by peer".into()));
        }
        Ok(self
            .answers
            .get(document)
            .map(|ids| ids.iter().map(|id| MatchId::from(*id)).collect())
            .unwrap_or_default())
    }
}

fn client() -> Arc<TableClient> {
    Arc::new(TableClient {
        answers: HashMap::from([(r#"{"f":1}"#, vec!["q1", "q2"])]),
    })
}

fn run(topology: Topology, tuples: Vec<Tuple>) -> (Vec<Signal>, TopologyStats) {
    let mut topology = topology;
    for tuple in tuples {
        topology.submit(tuple).expect("submit");
    }
    topology.close_input();
    let signals: Vec<Signal> = topology.signals().iter().collect();
    let stats = topology.finish().expect("workers join");
    (signals, stats)
}

fn signals_for(signals: &[Signal], id: u64) -> Vec<Signal> {
    signals
        .iter()
        .filter(|signal| match signal {
            Signal::Emit { anchor, .. } => *anchor == id,
            Signal::Ack(m) | Signal::Fail(m) => *m == id,
            Signal::ReportError(_) => false,
        })
        .cloned()
        .collect()
}

fn line(id: u64, json: &str) -> Tuple {
    Tuple::from_json_line(id, json).expect("valid tuple json")
}

#[test]
fn scenarios_flow_through_worker_pool() {
    let topology = Topology::spawn(client(), 3, 4).expect("spawn");
    let tuples = vec![
        line(1, r#"{"source":"{\"f\":1}","index":"docs","type":"q"}"#),
        line(2, r#"{"source":"{}","index":"docs","type":"q"}"#),
        line(3, r#"{"source":"{}","index":"docs"}"#),
        line(4, r#"{"source":"boom","index":"docs","type":"q"}"#),
    ];

    let (signals, stats) = run(topology, tuples);

    assert_eq!(
        signals_for(&signals, 1),
        vec![
            Signal::Emit {
                anchor: 1,
                record: OutputRecord { id: "q1".into() }
            },
            Signal::Emit {
                anchor: 1,
                record: OutputRecord { id: "q2".into() }
            },
            Signal::Ack(1),
        ]
    );
    assert_eq!(signals_for(&signals, 2), vec![Signal::Ack(2)]);
    assert_eq!(signals_for(&signals, 3), vec![Signal::Fail(3)]);
    assert_eq!(signals_for(&signals, 4), vec![Signal::Fail(4)]);

    let reports: Vec<&String> = signals
        .iter()
        .filter_map(|signal| match signal {
            Signal::ReportError(msg) => Some(msg),
            _ => None,
        })
        .collect();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().any(|msg| msg.contains("`type`")));
    assert!(reports.iter().any(|msg| msg.contains("connection reset")));

    assert_eq!(
        stats,
        TopologyStats {
            acked: 2,
            failed: 2,
            emitted: 2,
        }
    );
}

#[test]
fn every_tuple_gets_exactly_one_terminal_signal() {
    let topology = Topology::spawn(client(), 4, 2).expect("spawn");
    let tuples: Vec<Tuple> = (0..200u64)
        .map(|id| match id % 3 {
            0 => line(id, r#"{"source":"{\"f\":1}","index":"docs","type":"q"}"#),
            1 => line(id, r#"{"source":"boom","index":"docs","type":"q"}"#),
            _ => line(id, r#"{"index":"docs","type":"q"}"#),
        })
        .collect();

    let (signals, stats) = run(topology, tuples);

    let mut terminals: HashMap<u64, usize> = HashMap::new();
    for signal in &signals {
        if let Signal::Ack(id) | Signal::Fail(id) = signal {
            *terminals.entry(*id).or_default() += 1;
        }
    }
    assert_eq!(terminals.len(), 200);
    assert!(terminals.values().all(|count| *count == 1));
    assert_eq!(stats.acked + stats.failed, 200);
    assert_eq!(stats.emitted, 67 * 2);
}

#[test]
fn emissions_precede_their_ack() {
    let topology = Topology::spawn(client(), 2, 2).expect("spawn");
    let tuples: Vec<Tuple> = (0..20u64)
        .map(|id| line(id, r#"{"source":"{\"f\":1}","index":"docs","type":"q"}"#))
        .collect();

    let (signals, _) = run(topology, tuples);

    for id in 0..20u64 {
        let ordered = signals_for(&signals, id);
        assert_eq!(ordered.len(), 3, "tuple {id}");
        assert_eq!(ordered[2], Signal::Ack(id));
    }
}

#[test]
fn submit_after_close_is_rejected() {
    let mut topology = Topology::spawn(client(), 1, 1).expect("spawn");
    topology.close_input();
    let err = topology
        .submit(line(1, r#"{"source":"{}","index":"docs","type":"q"}"#))
        .expect_err("input closed");
    assert!(err.to_string().contains("closed"));
    topology.finish().expect("workers join");
}
