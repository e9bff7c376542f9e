use serial_test::serial;
use std::env::{remove_var, set_var};
use std::fs::{read_dir, read_to_string};
use std::io::Cursor;
use std::path::PathBuf;

use instrace::config::{OUTPUT_VAR, PRETTY_VAR};
use instrace::edge::EdgeType;
use instrace::output::Output;
use instrace::trace_entry::{events, replay_with};
use instrace::{
    replay, InsTracer, Register, RegisterSnapshot, Report, TraceConfig, TraceError, TraceEvent,
};

fn tmpdir() -> PathBuf {
    PathBuf::from(env!("CARGO_TARGET_TMPDIR"))
}

fn event_log(events: &[TraceEvent]) -> String {
    events
        .iter()
        .map(|e| serde_json::to_string(e).unwrap())
        .collect::<Vec<_>>()
        .join("\n")
}

fn instr(address: u64, disassembly: &str, rax: u64, edge_type: EdgeType) -> TraceEvent {
    TraceEvent::InstructionExecuted {
        address,
        disassembly: disassembly.to_string(),
        registers: RegisterSnapshot::default().with(Register::Rax, rax),
        written: [Register::Rax].into_iter().collect(),
        edge_type,
    }
}

#[test]
fn replay_writes_report() {
    let path = tmpdir().join("replay.json");
    let log = event_log(&[
        TraceEvent::ImageLoaded {
            base: 0x400000,
            load_offset: 0,
            entry: 0x401000,
        },
        instr(0x401000, "mov eax, 1", 1, EdgeType::Regular),
        TraceEvent::MemoryWritten {
            instruction: 0x401000,
            address: 0x602000,
            size: 2,
            bytes: vec![0x34, 0x12],
        },
        instr(0x401005, "call 0x401000", 1, EdgeType::Direct),
        instr(0x401000, "mov eax, 1", 1, EdgeType::Regular),
        TraceEvent::TraceEnd,
    ]);

    let tracer = InsTracer::new(TraceConfig::new(Output::File(path.clone()))).unwrap();
    let delivered = replay(Cursor::new(log), &tracer).unwrap();
    assert_eq!(delivered, 6);

    let report = Report::from_json(&read_to_string(&path).unwrap()).unwrap();
    assert_eq!(report.first_address, 0x401000);
    assert_eq!(report.last_address, 0x401000);
    let entry = report.instruction(0x401000).unwrap();
    assert_eq!(entry.count, 2);
    assert_eq!(entry.last_successor, 0x401005);
    assert_eq!(entry.memory.unwrap().last_value, 0x1234);
    assert_eq!(
        report.edge(0x401005, 0x401000).unwrap().edge_type,
        EdgeType::Direct
    );
    assert!(report.check_integrity().is_empty());
}

#[test]
fn replay_stops_at_conflict() {
    let path = tmpdir().join("replay_conflict.json");
    let log = event_log(&[
        instr(0x10, "jmp rax", 0, EdgeType::Indirect),
        instr(0x20, "nop", 0, EdgeType::Regular),
        instr(0x10, "jmp rax", 0, EdgeType::Direct),
        instr(0x20, "nop", 0, EdgeType::Regular),
        TraceEvent::TraceEnd,
    ]);
    let tracer = InsTracer::new(TraceConfig::new(Output::File(path.clone()))).unwrap();
    let err = replay(Cursor::new(log), &tracer).unwrap_err();
    assert!(matches!(err, TraceError::EdgeTypeConflict { from: 0x10, .. }));
    assert!(!path.exists());
}

#[test]
fn replay_reports_each_delivered_event() {
    let path = tmpdir().join("replay_with.json");
    let log = event_log(&[
        instr(0x10, "nop", 0, EdgeType::Regular),
        instr(0x11, "nop", 0, EdgeType::Regular),
        TraceEvent::TraceEnd,
    ]);
    let tracer = InsTracer::new(TraceConfig::new(Output::File(path.clone()))).unwrap();
    let mut seen = Vec::new();
    let delivered = replay_with(Cursor::new(log), &tracer, |event| seen.push(event.clone())).unwrap();
    assert_eq!(delivered, 3);
    assert_eq!(seen.len(), 3);
    assert_eq!(seen.last(), Some(&TraceEvent::TraceEnd));
    assert!(path.exists());
}

#[test]
fn failed_event_is_not_reported() {
    let path = tmpdir().join("replay_with_conflict.json");
    let log = event_log(&[
        instr(0x10, "jmp rax", 0, EdgeType::Indirect),
        instr(0x20, "nop", 0, EdgeType::Regular),
        instr(0x10, "jmp rax", 0, EdgeType::Direct),
        instr(0x20, "nop", 0, EdgeType::Regular),
    ]);
    let tracer = InsTracer::new(TraceConfig::new(Output::File(path))).unwrap();
    let mut count = 0;
    let err = replay_with(Cursor::new(log), &tracer, |_| count += 1).unwrap_err();
    assert!(matches!(err, TraceError::EdgeTypeConflict { .. }));
    assert_eq!(count, 3);
}

#[test]
fn malformed_line_reports_line_number() {
    let log = format!(
        "{}\n\n{{\"event\":\"bogus\"}}\n",
        serde_json::to_string(&TraceEvent::TraceEnd).unwrap()
    );
    let parsed: Vec<_> = events(Cursor::new(log)).collect();
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0].as_ref().unwrap(), &TraceEvent::TraceEnd);
    assert!(matches!(parsed[1], Err(TraceError::Event { line: 3, .. })));
}

#[test]
fn event_json_shape() {
    let json = serde_json::to_string(&instr(0x10, "nop", 0, EdgeType::Syscall)).unwrap();
    assert!(json.starts_with(r#"{"event":"instruction_executed","address":16"#));
    assert!(json.contains(r#""written":["rax"]"#));
    assert!(json.contains(r#""edge_type":"Syscall""#));
}

#[test]
fn missing_output_dir_fails_at_startup() {
    let path = tmpdir().join("no/such/dir/out.json");
    let err = InsTracer::new(TraceConfig::new(Output::File(path))).err().unwrap();
    assert!(matches!(err, TraceError::MissingOutputDir(_)));
}

#[test]
fn atomic_write_leaves_no_temporary_files() {
    let dir = tmpdir().join("atomic");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("report.json");
    Output::File(path.clone()).write_all(b"{}").unwrap();
    Output::File(path.clone()).write_all(b"[]").unwrap();
    assert_eq!(read_to_string(&path).unwrap(), "[]");
    let leftovers = read_dir(&dir)
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name() != "report.json")
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
#[serial]
fn config_from_env() {
    set_var(OUTPUT_VAR, "-");
    set_var(PRETTY_VAR, "yes");
    let config = TraceConfig::from_env().unwrap();
    assert_eq!(config.output, Output::Stdout);
    assert!(config.pretty);

    set_var(PRETTY_VAR, "maybe");
    assert!(matches!(TraceConfig::from_env(), Err(TraceError::Config(_))));

    remove_var(OUTPUT_VAR);
    remove_var(PRETTY_VAR);
    let config = TraceConfig::from_env().unwrap();
    assert_eq!(config.output, Output::File(PathBuf::from("itrace.out")));
    assert!(!config.pretty);
}

#[test]
#[serial]
fn tracer_from_env_uses_configured_output() {
    let path = tmpdir().join("from_env.json");
    set_var(OUTPUT_VAR, &path);
    remove_var(PRETTY_VAR);
    let tracer = InsTracer::from_env().unwrap();
    remove_var(OUTPUT_VAR);
    assert_eq!(tracer.config().output, Output::File(path));
}
