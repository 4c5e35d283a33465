use std::io::Write;
use std::sync::Arc;

use emerge_rs::catalog::MemoryCatalog;
use emerge_rs::executor::JobOutcome;
use emerge_rs::operation_tree::{AppendOptions, NodeSnapshot, QueueKind};
use emerge_rs::overlay::AttributeValue;
use emerge_rs::session::{JobReceipt, MergeOptions, UpdateOptions};
use emerge_rs::{Config, Session, Target};

#[tokio::main]
async fn main() {
	let mut opts;

	/* Parse console input */
	let parsed_options = {
		let args: Vec<String> = std::env::args().collect();

		opts = getopts::Options::new();
		opts.optflag( "h", "help",    "Show help");
		opts.optflag( "v", "verbose", "Increased vebosity");
		opts.optflag( "p", "pretend", "Only show what would be done");
		opts.optflag( "N", "newuse",  "update-world: include packages with changed flags");
		opts.optflag( "D", "deep",    "update-world: include deep dependencies");
		opts.optopt(  "c", "catalog", "Package catalog to use", "FILE");
		opts.parsing_style(getopts::ParsingStyle::FloatingFrees);

		let parsed_options = match opts.parse(&args[1..]) {
			Ok(m)  => { m }
			Err(e) => { println!("Unable to parse options: {}", e); return }
		};

		if parsed_options.opt_present("h") || parsed_options.free.is_empty() {
			eprintln!("{}", opts.usage("Usage: emerge-rs-terminal [options] <install|uninstall|update-world|sync|use|mask|unmask|keyword> [args]"));
			return;
		}

		parsed_options
	};

	let level = if parsed_options.opt_present("v") { log::LevelFilter::Debug } else { log::LevelFilter::Info };
	env_logger::Builder::from_default_env().filter_level(level).init();

	let config = Config::load_from_disk().unwrap_or_else(|e| {
		log::warn!("Failed to read config file: {}", e);
		log::warn!("Using default config.");
		Config::default()
	});

	let catalog_path = match parsed_options.opt_str("c").map(std::path::PathBuf::from).or_else(|| Config::config_dir().map(|d| d.join("catalog.json"))) {
		Some(p) => p,
		None => { log::error!("No catalog given and no config directory to look in."); return },
	};
	let catalog = match MemoryCatalog::load_from_file(&catalog_path) {
		Ok(c) => c,
		Err(e) => { log::error!("Failed to load catalog {}: {}", catalog_path.display(), e); return },
	};

	let session = Session::with_defaults(config, Arc::new(catalog));
	{
		let session = session.clone();
		tokio::spawn(async move {
			if tokio::signal::ctrl_c().await.is_ok() {
				log::warn!("Interrupted, killing running jobs");
				session.kill().await;
			}
		});
	}

	let pretend = parsed_options.opt_present("p");
	let command = parsed_options.free[0].as_str();
	let args = &parsed_options.free[1..];

	let result = match command {
		"install" => merge(&session, QueueKind::Install, args, pretend).await,
		"uninstall" => merge(&session, QueueKind::Uninstall, args, pretend).await,
		"update-world" => {
			let options = UpdateOptions {
				newuse: parsed_options.opt_present("N"),
				deep: parsed_options.opt_present("D"),
				pretend,
				..Default::default()
			};
			match session.update_all(options).await {
				Ok(receipts) => report(receipts).await,
				Err(e) => Err(e.into()),
			}
		},
		"sync" => match session.sync().await {
			Ok(receipts) => report(receipts).await,
			Err(e) => Err(e.into()),
		},
		"use" => {
			let Some((spec, flags)) = args.split_first() else {
				log::error!("Package not provided.");
				return
			};
			edit(&session, spec, flags.iter().map(|f| AttributeValue::Flag(f.clone())).collect()).await
		},
		"mask" => edit_one(&session, args, AttributeValue::Mask(true)).await,
		"unmask" => edit_one(&session, args, AttributeValue::Mask(false)).await,
		"keyword" => edit_one(&session, args, AttributeValue::Stability(true)).await,
		other => {
			log::error!("Unknown command `{}`.", other);
			return;
		},
	};

	match result {
		Ok(()) => {},
		Err(Error::UserCancelled) => println!("Nothing done."),
		Err(e) => log::error!("{} failed: {}", command, e),
	}
}

fn parse_targets(args: &[String]) -> Result<Vec<Target>, Error> {
	if args.is_empty() {
		return Err(Error::MissingArgument);
	}
	args.iter().map(|a| a.parse::<Target>().map_err(|e| Error::EmergeRs(e.into()))).collect()
}

async fn merge(session: &Session, kind: QueueKind, args: &[String], pretend: bool) -> Result<(), Error> {
	for target in parse_targets(args)? {
		session.append(target, kind, AppendOptions::default()).await?;
	}

	let snapshot = session.snapshot().await?;
	let (title, nodes) = match kind {
		QueueKind::Install => ("Installing packages:", &snapshot.install),
		QueueKind::Uninstall => ("Removing packages:", &snapshot.uninstall),
		QueueKind::Update => ("Updating packages:", &snapshot.update),
	};
	println!("{}", title);
	for node in nodes {
		print_node(node, 1);
	}

	let edits = session.pending_edits().await?;
	if !edits.is_empty() {
		println!("Configuration changes:");
		for edit in &edits {
			println!("\t{} {:?} in {}", edit.target, edit.value, edit.location.file().display());
		}
	}

	if !pretend {
		confirm()?;
	}

	let options = MergeOptions { pretend, ..Default::default() };
	let receipts = match kind {
		QueueKind::Uninstall => session.uninstall(options).await?,
		_ => session.install(options).await?,
	};
	report(receipts).await
}

fn print_node(node: &NodeSnapshot, depth: usize) {
	let marker = if node.metadata.is_update {
		"U"
	} else if node.metadata.is_downgrade {
		"D"
	} else if node.metadata.from_version.is_none() {
		"N"
	} else {
		"R"
	};
	let from = node.metadata.from_version.as_ref().map(|v| format!(" [{}]", v)).unwrap_or_default();
	let flags = if node.metadata.use_flag_delta.is_empty() { String::new() } else { format!(" ({})", node.metadata.use_flag_delta.join(" ")) };
	println!("{}[{}] {}{}{}", "\t".repeat(depth), marker, node.package, from, flags);
	for child in &node.children {
		print_node(child, depth + 1);
	}
}

async fn edit_one(session: &Session, args: &[String], value: AttributeValue) -> Result<(), Error> {
	let spec = args.first().ok_or(Error::MissingArgument)?;
	edit(session, spec, vec![value]).await
}

async fn edit(session: &Session, spec: &str, values: Vec<AttributeValue>) -> Result<(), Error> {
	if values.is_empty() {
		return Err(Error::MissingArgument);
	}
	let target: Target = spec.parse().map_err(|e: emerge_rs::package::ParseError| Error::EmergeRs(e.into()))?;
	for value in values {
		session.set_attribute(target.clone(), value).await?;
	}

	println!("Configuration changes:");
	for edit in session.pending_edits().await? {
		println!("\t{} {:?} in {}", edit.target, edit.value, edit.location.file().display());
	}
	confirm()?;

	let summary = session.commit().await?;
	for file in &summary.files {
		println!("Wrote {}", file.display());
	}
	Ok(())
}

fn confirm() -> Result<(), Error> {
	let stdin = std::io::stdin();
	print!("Commit changes? [(y)/n] ");
	let _ = std::io::stdout().flush();
	loop {
		let mut input = String::new();
		let _ = stdin.read_line(&mut input);
		let input = input.trim().to_lowercase();
		if input == "y" || input.is_empty() {
			return Ok(());
		} else if input == "n" {
			return Err(Error::UserCancelled);
		} else {
			println!("\nInput invalid.")
		}
	}
}

async fn report(receipts: Vec<JobReceipt>) -> Result<(), Error> {
	if receipts.is_empty() {
		println!("Nothing to do.");
	}
	for receipt in receipts {
		let id = receipt.id();
		let outcome = receipt.wait().await;
		if !outcome.success() {
			return Err(Error::JobFailed(outcome));
		}
		log::info!("Job {} finished.", id);
	}
	Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("emerge-rs error: {0}")]
	EmergeRs(#[from] emerge_rs::Error),
	#[error("Missing argument")]
	MissingArgument,
	#[error("Job {0}")]
	JobFailed(JobOutcome),
	#[error("User cancelled an action")]
	UserCancelled,
}
