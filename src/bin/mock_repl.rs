//! Mock REPL database for integration testing
//!
//! Speaks the same textual protocol as the database prototype (banner,
//! prompt, insert/select, `.exit`) so the harness can be tested without a
//! C++ toolchain. Flags switch on specific misbehaviours.

use std::io::{BufRead, Write};
use std::time::Duration;

const PROMPT: &str = "sqlite > ";

#[derive(Default)]
struct Flags {
    banner: Option<String>,
    no_banner: bool,
    stall_after_banner: bool,
    crash_on_insert: bool,
    stderr_noise: bool,
    ignore_eof: bool,
    linger_after_exit: bool,
    no_prompt: bool,
    delay_ms: u64,
    exit_code: i32,
}

impl Flags {
    fn parse() -> Self {
        let mut flags = Flags::default();
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--banner" => flags.banner = args.next(),
                "--no-banner" => flags.no_banner = true,
                "--stall-after-banner" => flags.stall_after_banner = true,
                "--crash-on-insert" => flags.crash_on_insert = true,
                "--stderr-noise" => flags.stderr_noise = true,
                "--ignore-eof" => flags.ignore_eof = true,
                "--linger-after-exit" => flags.linger_after_exit = true,
                "--no-prompt" => flags.no_prompt = true,
                "--delay-ms" => {
                    flags.delay_ms = args.next().and_then(|ms| ms.parse().ok()).unwrap_or(0)
                }
                "--exit-code" => {
                    flags.exit_code = args.next().and_then(|c| c.parse().ok()).unwrap_or(0)
                }
                other => eprintln!("mock_repl: ignoring unknown flag {other}"),
            }
        }
        flags
    }
}

struct Row {
    id: i64,
    username: String,
    email: String,
}

fn main() {
    let flags = Flags::parse();
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut reader = stdin.lock();
    let mut out = stdout.lock();
    let mut rows: Vec<Row> = Vec::new();

    if !flags.no_banner {
        let banner = flags.banner.as_deref().unwrap_or("Welcome to sqlite");
        writeln!(out, "{banner}").ok();
    }

    loop {
        if !flags.no_prompt {
            write!(out, "{PROMPT}").ok();
        }
        out.flush().ok();

        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            if flags.ignore_eof {
                sleep_forever();
            }
            std::process::exit(0);
        }

        if flags.stderr_noise {
            eprintln!("mock_repl: got {:?}", line.trim_end());
        }

        if flags.stall_after_banner {
            // Swallow input without ever answering
            loop {
                line.clear();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    sleep_forever();
                }
            }
        }

        if flags.delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(flags.delay_ms));
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = tokens.first() else {
            continue;
        };

        if first.starts_with('.') {
            if *first == ".exit" {
                writeln!(out, "byeee").ok();
                out.flush().ok();
                if flags.linger_after_exit {
                    sleep_forever();
                }
                std::process::exit(flags.exit_code);
            }
            writeln!(out, "Unrecognized command").ok();
            continue;
        }

        match *first {
            "insert" => {
                if flags.crash_on_insert {
                    eprintln!("mock_repl: simulated crash on insert");
                    std::process::exit(139);
                }
                if tokens.len() < 4 {
                    writeln!(out, "syntax error -> usage: insert <id> <username> <email>").ok();
                    continue;
                }
                match tokens[1].parse() {
                    Ok(id) => rows.push(Row {
                        id,
                        username: tokens[2].to_string(),
                        email: tokens[3].to_string(),
                    }),
                    Err(_) => {
                        writeln!(out, "invalid id: {}", tokens[1]).ok();
                    }
                }
            }
            "select" => {
                for row in &rows {
                    writeln!(out, "({}, {}, {})", row.id, row.username, row.email).ok();
                }
                writeln!(out, "{} rows returned", rows.len()).ok();
            }
            _ => {
                writeln!(out, "Unrecognized keyword at the beginning").ok();
            }
        }
    }
}

fn sleep_forever() -> ! {
    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}
