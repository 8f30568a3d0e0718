//! Interactive SQL shell over the storage engine.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tabled::builder::Builder;
use tabled::settings::Style;

use executor::{ExecResult, ExecuteEngine};

#[derive(Parser, Debug)]
#[command(name = "minidb", about = "Interactive shell for the minidb engine")]
struct Args {
    /// Directory holding one file per database
    #[arg(long, default_value = "./minidb_data")]
    data_dir: PathBuf,
    /// Pages the buffer pool keeps resident per database
    #[arg(long, default_value_t = 256)]
    buffer_pages: usize,
    /// Execute the given statements and exit instead of going interactive
    #[arg(short = 'e', long = "execute")]
    execute: Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let mut engine = ExecuteEngine::new(&args.data_dir, args.buffer_pages)?;

    if let Some(script) = args.execute {
        run_script(&mut engine, &script);
        engine.shutdown()?;
        return Ok(());
    }

    let mut editor = DefaultEditor::new()?;
    let mut pending = String::new();
    loop {
        let prompt = if pending.is_empty() {
            "minidb> "
        } else {
            "     -> "
        };
        match editor.readline(prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if pending.is_empty() && trimmed.is_empty() {
                    continue;
                }
                pending.push_str(&line);
                pending.push('\n');
                if !trimmed.ends_with(';') {
                    continue;
                }

                let statement = pending.trim().trim_end_matches(';').trim().to_string();
                let _ = editor.add_history_entry(pending.trim());
                pending.clear();

                if statement.eq_ignore_ascii_case("quit")
                    || statement.eq_ignore_ascii_case("exit")
                {
                    break;
                }
                if let Some(path) = statement
                    .strip_prefix("execfile")
                    .or_else(|| statement.strip_prefix("EXECFILE"))
                {
                    exec_file(&mut engine, path.trim().trim_matches('"').trim_matches('\''));
                    continue;
                }
                run_statement(&mut engine, &statement);
            }
            Err(ReadlineError::Interrupted) => {
                pending.clear();
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("error: {e}");
                break;
            }
        }
    }

    engine.shutdown()?;
    println!("bye");
    Ok(())
}

fn exec_file(engine: &mut ExecuteEngine, path: &str) {
    match fs::read_to_string(path) {
        Ok(script) => run_script(engine, &script),
        Err(e) => eprintln!("error: cannot read '{path}': {e}"),
    }
}

fn run_script(engine: &mut ExecuteEngine, script: &str) {
    for statement in script.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        run_statement(engine, statement);
    }
}

fn run_statement(engine: &mut ExecuteEngine, statement: &str) {
    let started = Instant::now();
    let parsed = match parser::parse(statement) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("error: {e}");
            return;
        }
    };
    match engine.execute(parsed) {
        Ok(result) => {
            print_result(&result);
            println!("({} us)", started.elapsed().as_micros());
        }
        Err(e) => eprintln!("error: {e}"),
    }
}

fn print_result(result: &ExecResult) {
    match result {
        ExecResult::Batch { columns, rows } => {
            let mut builder = Builder::default();
            builder.push_record(columns.iter().cloned());
            for row in rows {
                builder.push_record(row.iter().map(|value| value.to_string()));
            }
            let mut table = builder.build();
            table.with(Style::ascii());
            println!("{table}");
            println!(
                "{} row{}",
                rows.len(),
                if rows.len() == 1 { "" } else { "s" }
            );
        }
        ExecResult::Affected(count) => {
            println!("{count} row{} affected", if *count == 1 { "" } else { "s" });
        }
        ExecResult::Done(message) => println!("{message}"),
    }
}
