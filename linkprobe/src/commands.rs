use crate::CLAP_STYLING;
use clap::{ArgAction, arg, command, value_parser};
use linkprobe_core::config::DEFAULT_CONFIG_DIR;
use std::path::PathBuf;
use url::Url;

fn format_arg() -> clap::Arg {
    arg!(-f --"format" <FORMAT>)
        .required(false)
        .help("Report format: text, json, csv")
        .value_parser(["text", "json", "csv"])
        .default_value("text")
}

fn output_arg() -> clap::Arg {
    arg!(-o --"output" <PATH>)
        .required(false)
        .help("Save report to file (default: display to screen)")
        .value_parser(value_parser!(PathBuf))
}

fn ids_arg(help: &'static str) -> clap::Arg {
    arg!([IDS] ...)
        .help(help)
        .value_parser(value_parser!(i64))
}

/// Flags shared by `crawl` and `rerun`.
fn crawl_tuning_args() -> Vec<clap::Arg> {
    vec![
        arg!(-t --"threads" <NUM_WORKERS>)
            .required(false)
            .help("The number of pages inspected at the same time")
            .value_parser(value_parser!(usize))
            .default_value("4"),
        arg!(--"probe-concurrency" <NUM>)
            .required(false)
            .help("The number of link probes in flight per page")
            .value_parser(value_parser!(usize))
            .default_value("8"),
        arg!(--"timeout" <SECONDS>)
            .required(false)
            .help("Request timeout in seconds")
            .value_parser(value_parser!(u64))
            .env("LINKPROBE_TIMEOUT")
            .default_value("10"),
        arg!(--"stale-after" <SECONDS>)
            .required(false)
            .help("Fail crawls left running by an earlier process after this many seconds")
            .value_parser(value_parser!(i64).range(0..))
            .env("LINKPROBE_STALE_AFTER")
            .default_value("3600"),
        arg!(--"probe-internal")
            .required(false)
            .help("Also probe internal links (default: only external links)")
            .action(ArgAction::SetTrue),
        arg!(--"include-subdomains")
            .required(false)
            .help("Treat subdomains of the page's host as internal")
            .action(ArgAction::SetTrue),
        format_arg(),
        output_arg(),
    ]
}

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("linkprobe")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("linkprobe")
        .about("Fetch a page once, extract its metadata and check its links")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Suppress banner and non-essential output")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(-v --"verbose" "Increase log verbosity (-v info, -vv debug)")
                .action(ArgAction::Count)
                .global(true),
        )
        .arg(
            arg!(--"db" <PATH>)
                .required(false)
                .help("Path to the linkprobe database (default: ~/.config/linkprobe/linkprobe.db)")
                .env("LINKPROBE_DB")
                .global(true),
        )
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Initializes the linkprobe database on your filesystem")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Location to store the linkprobe database")
                        .default_value(DEFAULT_CONFIG_DIR),
                )
                .arg(
                    arg!(--"force")
                        .help("Overwrite any existing database at the specified location")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("add")
                .about("Register URLs without crawling them")
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(false)
                        .help("A URL to register (repeatable)")
                        .value_parser(value_parser!(Url))
                        .action(ArgAction::Append)
                        .conflicts_with("hosts-file"),
                )
                .arg(
                    arg!(-H --"hosts-file" <PATH>)
                        .required(false)
                        .help("Path to a newline-delimited file of URLs")
                        .value_parser(value_parser!(PathBuf))
                        .conflicts_with("url"),
                ),
        )
        .subcommand(
            command!("crawl")
                .about(
                    "Fetch each page once, extract its metadata and probe its external links. \
                Results are stored in the database.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(false)
                        .help("A URL to crawl (repeatable)")
                        .value_parser(value_parser!(Url))
                        .action(ArgAction::Append)
                        .conflicts_with("hosts-file"),
                )
                .arg(
                    arg!(-H --"hosts-file" <PATH>)
                        .required(false)
                        .help("Path to a newline-delimited file of URLs to crawl")
                        .value_parser(value_parser!(PathBuf))
                        .conflicts_with("url"),
                )
                .args(crawl_tuning_args()),
        )
        .subcommand(
            command!("list")
                .about("List stored URLs and their latest crawl")
                .arg(
                    arg!(-s --"search" <TEXT>)
                        .required(false)
                        .help("Only URLs whose address or title contains TEXT (case-insensitive)"),
                )
                .arg(
                    arg!(--"status" <STATUS>)
                        .required(false)
                        .help("Only URLs with this status")
                        .value_parser(["pending", "running", "completed", "error"]),
                )
                .arg(
                    arg!(--"sort" <FIELD>)
                        .required(false)
                        .help("Sort column")
                        .value_parser([
                            "id",
                            "url",
                            "title",
                            "status",
                            "html_version",
                            "created_at",
                            "updated_at",
                        ])
                        .default_value("id"),
                )
                .arg(
                    arg!(--"order" <ORDER>)
                        .required(false)
                        .help("Sort direction")
                        .value_parser(["asc", "desc"])
                        .default_value("desc"),
                )
                .arg(
                    arg!(--"limit" <NUM>)
                        .required(false)
                        .help("Show at most NUM URLs")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    arg!(--"offset" <NUM>)
                        .required(false)
                        .help("Skip the first NUM URLs")
                        .value_parser(value_parser!(usize))
                        .default_value("0"),
                ),
        )
        .subcommand(
            command!("show")
                .about("Show the latest crawl of a stored URL")
                .arg(
                    arg!(<ID>)
                        .help("The URL id (see `linkprobe list`)")
                        .value_parser(value_parser!(i64)),
                )
                .arg(
                    arg!(--"type" <TYPE>)
                        .required(false)
                        .help("Which links to list")
                        .value_parser(["all", "internal", "external", "broken", "accessible"])
                        .default_value("all")
                        .conflicts_with("broken"),
                )
                .arg(
                    arg!(--"broken")
                        .required(false)
                        .help("Only list broken links (same as --type broken)")
                        .action(ArgAction::SetTrue),
                )
                .arg(format_arg())
                .arg(output_arg()),
        )
        .subcommand(
            command!("rerun")
                .about("Crawl stored URLs again")
                .arg(ids_arg("The URL ids to crawl again").required_unless_present("all"))
                .arg(
                    arg!(--"all")
                        .required(false)
                        .help("Crawl every stored URL again")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("IDS"),
                )
                .args(crawl_tuning_args()),
        )
        .subcommand(
            command!("remove")
                .about("Remove stored URLs (crawl history is kept)")
                .arg(ids_arg("The URL ids to remove").required(true)),
        )
}
