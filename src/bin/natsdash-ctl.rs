use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process;

const COMMANDS: &[&str] = &[
    "profiles",
    "add-profile",
    "remove-profile",
    "connect",
    "disconnect",
    "server-info",
    "streams",
    "stream-info",
    "add-stream",
    "consumers",
    "consumer-info",
    "open",
    "filter",
    "next",
    "prev",
    "pub",
    "close",
    "delete-stream",
    "delete-consumer",
    "help",
    "quit",
];

fn socket_path() -> PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(runtime_dir).join("natsdash.sock")
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(word) = args.first() else {
        usage();
        process::exit(1);
    };
    if !COMMANDS.contains(&word.as_str()) {
        eprintln!("unknown command: {word}");
        usage();
        process::exit(1);
    }

    let cmd = args.join(" ");
    let path = socket_path();
    let mut stream = match UnixStream::connect(&path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("natsdash not running ({}): {e}", path.display());
            process::exit(1);
        }
    };

    if let Err(e) = writeln!(stream, "{cmd}") {
        eprintln!("failed to send command: {e}");
        process::exit(1);
    }
}

fn usage() {
    eprintln!("usage: natsdash-ctl <command> [args...]");
    eprintln!();
    eprintln!("forwards one console command to a running natsdash, e.g.");
    eprintln!("  natsdash-ctl open orders 'orders.*'");
    eprintln!("  natsdash-ctl next");
    eprintln!("  natsdash-ctl pub orders.received hello");
    eprintln!();
    eprintln!("commands: {}", COMMANDS.join(", "));
}
