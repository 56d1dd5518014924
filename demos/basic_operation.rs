//! A copy-pasteable starting point: open a database, put/get/delete one
//! key, and print the outcome.

use barrelkv::{Options, DB};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

fn main() {
    TermLogger::init(LevelFilter::Info, Config::default(), TerminalMode::Mixed, ColorChoice::Auto)
        .expect("install logger");

    let dir = std::env::temp_dir().join("barrelkv-basic-operation");
    let options = Options { dir_path: dir, ..Options::default() };

    let db = DB::open(options).expect("open database");

    db.put(b"name", b"enophan").expect("put");
    let value = db.get(b"name").expect("get");
    println!("value: {}", String::from_utf8_lossy(&value));

    db.delete(b"name").expect("delete");
    match db.get(b"name") {
        Ok(_) => unreachable!("key was just deleted"),
        Err(e) => println!("after delete: {e}"),
    }
}
