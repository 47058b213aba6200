// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("propguard")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Propguard Contributors")
        .about("Guarded rollout of service property files with restart and rollback")
        .subcommand_required(false)
        .arg(
            Arg::new("settings")
                .short('s')
                .long("settings")
                .value_name("PATH")
                .default_value("/etc/propguard/propguard.toml")
                .global(true)
                .help("Settings file"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .global(true)
                .help("Managed properties file, overrides the settings file"),
        )
        .subcommand(
            Command::new("get")
                .about("Print the value of a key")
                .arg(Arg::new("key").required(true)),
        )
        .subcommand(
            Command::new("list")
                .about("List keys and values, optionally limited to a prefix")
                .arg(
                    Arg::new("prefix")
                        .short('p')
                        .long("prefix")
                        .default_value(""),
                ),
        )
        .subcommand(
            Command::new("apply")
                .about("Change existing keys, restart the service, roll back on failure")
                .arg(
                    Arg::new("edits")
                        .required(true)
                        .num_args(1..)
                        .value_name("KEY=VALUE")
                        .help("Edits as key=value"),
                )
                .arg(
                    Arg::new("message")
                        .short('m')
                        .long("message")
                        .help("Description stored in the rollout history"),
                ),
        )
        .subcommand(Command::new("rollback").about("Restore the properties file from the backup slot"))
        .subcommand(
            Command::new("restart").about("Restart the dependent service without changing configuration"),
        )
        .subcommand(
            Command::new("versions")
                .about("Show installed versions of system packages")
                .arg(Arg::new("packages").required(true).num_args(1..)),
        )
        .subcommand(
            Command::new("history")
                .about("Show rollout history")
                .arg(
                    Arg::new("verbose")
                        .short('v')
                        .long("verbose")
                        .action(ArgAction::SetTrue)
                        .help("Show requested edits for each rollout"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(Arg::new("shell").required(true)),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("propguard.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
