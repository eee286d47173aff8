// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("debforge")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Rebuild .deb archives from an installed dpkg database")
        .subcommand_required(true)
        .arg(
            Arg::new("root")
                .short('r')
                .long("root")
                .value_name("DIR")
                .default_value("/")
                .global(true)
                .help("Filesystem root the database and package files live under"),
        )
        .arg(
            Arg::new("admin_dir")
                .long("admin-dir")
                .value_name("DIR")
                .default_value("var/lib/dpkg")
                .global(true)
                .help("dpkg admin directory, relative to the root"),
        )
        .arg(
            Arg::new("lock")
                .long("lock")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Hold dpkg's lock while reading the status file"),
        )
        .subcommand(
            Command::new("list")
                .about("List installed packages")
                .arg(
                    Arg::new("sorted")
                        .short('s')
                        .long("sorted")
                        .action(ArgAction::SetTrue)
                        .help("Sort by identifier instead of status file order"),
                )
                .arg(
                    Arg::new("leaves")
                        .short('l')
                        .long("leaves")
                        .action(ArgAction::SetTrue)
                        .help("Only packages nothing else depends on"),
                ),
        )
        .subcommand(
            Command::new("show")
                .about("Show the control record and files of a package")
                .arg(Arg::new("package").required(true).help("Package identifier")),
        )
        .subcommand(
            Command::new("rebuild")
                .about("Rebuild .deb archives of installed packages")
                .arg(
                    Arg::new("packages")
                        .num_args(0..)
                        .help("Package identifiers (default: leaves)"),
                )
                .arg(
                    Arg::new("all")
                        .short('a')
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("Rebuild every installed package instead of leaves"),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("DIR")
                        .default_value(".")
                        .help("Output directory"),
                )
                .arg(
                    Arg::new("jobs")
                        .short('j')
                        .long("jobs")
                        .value_name("N")
                        .help("Worker threads (default: available parallelism)"),
                )
                .arg(
                    Arg::new("compression")
                        .short('c')
                        .long("compression")
                        .value_name("FORMAT")
                        .default_value("gz")
                        .help("Member compression: gz, xz, zst or none"),
                )
                .arg(
                    Arg::new("level")
                        .long("level")
                        .value_name("N")
                        .help("Compression level (default depends on the format)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the batch report as JSON"),
                )
                .arg(
                    Arg::new("archive")
                        .short('A')
                        .long("archive")
                        .action(ArgAction::SetTrue)
                        .help("Pack the rebuilt archives into one .tar.gz in the output directory"),
                )
                .arg(
                    Arg::new("archive_name")
                        .long("archive-name")
                        .value_name("NAME")
                        .default_value("debforge-packages.tar.gz")
                        .help("File name of the bundle"),
                )
                .arg(
                    Arg::new("remove_after")
                        .short('R')
                        .long("remove-after")
                        .action(ArgAction::SetTrue)
                        .help("Delete the .deb files once bundled"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("debforge.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
