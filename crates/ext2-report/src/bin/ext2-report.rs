use std::fs::File;
use std::io::stdout;
use std::process::ExitCode;

use ext2_report::{FilesystemReader, TextSink};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let image_path = match &args[..] {
        [_, image_path] => image_path,
        _ => {
            let program = args.first().map_or("ext2-report", String::as_str);
            eprintln!("Usage: {program} <image_file>");
            return ExitCode::from(1);
        }
    };

    if let Err(err) = ext2_report::logging::init(log::LevelFilter::Warn) {
        eprintln!("failed to install logger: {err}");
    }

    let file = match File::open(image_path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("failed to open image {image_path}: {err}");
            return ExitCode::from(2);
        }
    };

    match run(file) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{image_path}: {err}");
            ExitCode::from(2)
        }
    }
}

fn run(file: File) -> ext2_report::Result<()> {
    let mut reader = FilesystemReader::read(file)?;
    let mut sink = TextSink::new(stdout().lock());
    reader.report(&mut sink)?;
    sink.flush()
}
