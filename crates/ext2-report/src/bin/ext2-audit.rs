use std::fs;
use std::io::{stdout, Write};
use std::process::ExitCode;

use ext2_report::{Inconsistency, Record, Transcript};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let transcript_path = match &args[..] {
        [_, transcript_path] => transcript_path,
        _ => {
            let program = args.first().map_or("ext2-audit", String::as_str);
            eprintln!("Usage: {program} <transcript_file>");
            return ExitCode::from(1);
        }
    };

    if let Err(err) = ext2_report::logging::init(log::LevelFilter::Warn) {
        eprintln!("failed to install logger: {err}");
    }

    let text = match fs::read_to_string(transcript_path) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("failed to read transcript {transcript_path}: {err}");
            return ExitCode::from(1);
        }
    };

    let mut records = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        match line.parse::<Record>() {
            Ok(record) => records.push(record),
            Err(err) => {
                eprintln!("{transcript_path}: line {}: {err}", index + 1);
                return ExitCode::from(1);
            }
        }
    }

    let transcript: Transcript = records.into_iter().collect();
    let found = match transcript.audit() {
        Ok(found) => found,
        Err(err) => {
            eprintln!("{transcript_path}: {err}");
            return ExitCode::from(1);
        }
    };
    if let Err(err) = print(&found) {
        eprintln!("failed to write findings: {err}");
        return ExitCode::from(1);
    }

    if found.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}

fn print(found: &[Inconsistency]) -> std::io::Result<()> {
    let mut out = stdout().lock();
    for inconsistency in found {
        writeln!(out, "{inconsistency}")?;
    }
    out.flush()
}
