use clap::ArgMatches;
use colored::Colorize;
use commands::command_argument_builder;
use linkprobe::handlers::{
    database_path, handle_add, handle_crawl, handle_init, handle_list, handle_remove,
    handle_rerun, handle_show, init_tracing, print_banner,
};

mod commands;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    init_tracing(chosen_command.get_count("verbose"));

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    if let Err(e) = run(&chosen_command, quiet).await {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(chosen_command: &ArgMatches, quiet: bool) -> anyhow::Result<()> {
    let db_path = database_path(chosen_command);

    match chosen_command.subcommand() {
        // No subcommand provided, just show the banner
        None => Ok(()),
        Some(("init", primary_command)) => {
            handle_init(primary_command, chosen_command.get_one::<String>("db"))
        }
        Some(("add", primary_command)) => handle_add(primary_command, &db_path).map(|_| ()),
        Some(("crawl", primary_command)) => handle_crawl(primary_command, &db_path, quiet).await,
        Some(("list", sub)) => handle_list(sub, &db_path),
        Some(("show", primary_command)) => handle_show(primary_command, &db_path),
        Some(("rerun", primary_command)) => handle_rerun(primary_command, &db_path, quiet).await,
        Some(("remove", primary_command)) => handle_remove(primary_command, &db_path).map(|_| ()),
        _ => unreachable!("clap should ensure we don't get here"),
    }
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
