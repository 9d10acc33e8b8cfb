#[macro_use]
extern crate clap;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;
extern crate libc;
extern crate loggerv;

extern crate podcat;

use podcat::*;

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use podcat::docker::DockerCli;
use podcat::manifest::{load_vars_file, parse_var, Manifest, VariableBag};
use podcat::runner::RunOptions;

static CANCEL: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: libc::c_int) {
    CANCEL.store(true, Ordering::SeqCst);
}

fn print_error_debug(e: &Error) {
    // unwind the error chain for -v consumers
    for cause in e.iter().skip(1) {
        warn!("caused by: {}", cause);
    }
}

fn main() {
    let app = App::new("podcat")
        .version(crate_version!())
        .setting(AppSettings::VersionlessSubcommands)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .setting(AppSettings::ColoredHelp)
        .setting(AppSettings::DeriveDisplayOrder)
        .global_settings(&[AppSettings::ColoredHelp])
        .about("Converge a docker host onto a pod manifest")
        .arg(Arg::with_name("verbose")
            .short("v")
            .multiple(true)
            .help("Increase verbosity"))
        .arg(Arg::with_name("debug")
            .short("d")
            .long("debug")
            .help("Adds line numbers to log statements"))

        .subcommand(manifest_args(SubCommand::with_name("run")
            .about("Converge the host onto the manifest")
            .arg(Arg::with_name("dry")
                .long("dry")
                .help("Plan only, mutate nothing"))
            .arg(Arg::with_name("wait")
                .short("w")
                .long("wait")
                .takes_value(true)
                .help("Seconds to observe each created container for early exits"))
            .arg(Arg::with_name("print")
                .long("print")
                .help("Print the structured plan report to stdout"))))

        .subcommand(manifest_args(SubCommand::with_name("pull")
            .about("Pull every image the manifest references")
            .arg(Arg::with_name("print")
                .long("print")
                .help("Print the structured plan report to stdout"))))

        .subcommand(manifest_args(SubCommand::with_name("rm")
            .about("Remove the pod's containers from the host")
            .arg(Arg::with_name("dry")
                .long("dry")
                .help("Plan only, mutate nothing"))
            .arg(Arg::with_name("print")
                .long("print")
                .help("Print the structured plan report to stdout"))))

        .subcommand(manifest_args(SubCommand::with_name("clean")
            .about("Remove old image revisions for the pod's repositories")
            .arg(Arg::with_name("keep")
                .short("k")
                .long("keep")
                .takes_value(true)
                .help("Number of tags to keep per repository (default 5)"))
            .arg(Arg::with_name("dry")
                .long("dry")
                .help("Plan only, mutate nothing"))))

        .subcommand(SubCommand::with_name("tar")
            .about("Package a manifest and artifacts into a release archive")
            .arg(Arg::with_name("file")
                .short("f")
                .long("file")
                .takes_value(true)
                .help("Manifest path (default compose.yml)"))
            .arg(Arg::with_name("output")
                .short("O")
                .long("output")
                .takes_value(true)
                .required(true)
                .help("Archive path to write; .gz/.tgz compresses"))
            .arg(Arg::with_name("artifacts")
                .multiple(true)
                .help("Artifact files to include")))

        .subcommand(SubCommand::with_name("recover")
            .about("Start previously managed containers after an engine restart"))

        .subcommand(manifest_args(SubCommand::with_name("info")
            .about("Print the rendered, normalized pod")));

    // arg parse
    let args = app.get_matches();
    let name = args.subcommand_name().unwrap();
    let _ = run(&args).map_err(|e| {
        error!("{} error: {}", name, e);
        print_error_debug(&e);
        process::exit(1);
    });
    process::exit(0);
}

// the flags every manifest-consuming verb shares
fn manifest_args<'a, 'b>(cmd: App<'a, 'b>) -> App<'a, 'b> {
    cmd.arg(Arg::with_name("file")
        .short("f")
        .long("file")
        .takes_value(true)
        .help("Manifest path, or - for stdin (default compose.yml)"))
    .arg(Arg::with_name("var")
        .long("var")
        .takes_value(true)
        .multiple(true)
        .number_of_values(1)
        .help("Template variable KEY=VALUE (repeatable)"))
    .arg(Arg::with_name("vars")
        .long("vars")
        .takes_value(true)
        .help("Yaml file of template variables"))
    .arg(Arg::with_name("tar")
        .long("tar")
        .help("Treat the manifest file as a release archive"))
    .arg(Arg::with_name("demand-artifacts")
        .long("demand-artifacts")
        .help("Fail if a release archive carries no artifacts"))
}

fn run(args: &ArgMatches) -> Result<()> {
    // initialise deps and set log default - always show INFO messages (+1)
    loggerv::Logger::new()
        .verbosity(args.occurrences_of("verbose") + 1)
        .module_path(true)
        .line_numbers(args.is_present("debug"))
        .init()
        .unwrap();

    unsafe {
        // Ignore SIGPIPE errors to avoid having to use let _ = write! everywhere
        // See https://github.com/rust-lang/rust/issues/46016
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        // first ctrl-c cancels the plan at the next action boundary
        libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t);
    }

    dispatch_commands(args)
}

/// Dispatch clap arguments to podcat handlers
fn dispatch_commands(args: &ArgMatches) -> Result<()> {
    if let Some(a) = args.subcommand_matches("tar") {
        let manifest = Path::new(a.value_of("file").unwrap_or("compose.yml"));
        let output = Path::new(a.value_of("output").unwrap());
        let artifacts: Vec<PathBuf> = a
            .values_of("artifacts")
            .map(|vs| vs.map(PathBuf::from).collect())
            .unwrap_or_default();
        return archive::pack(manifest, &artifacts, output);
    }

    if args.subcommand_matches("recover").is_some() {
        let engine: Arc<dyn EngineClient> = Arc::new(DockerCli::connect()?);
        let started = engine::recover(&*engine)?;
        info!("Recovered {} containers", started.len());
        for name in started {
            println!("{}", name);
        }
        return Ok(());
    }

    if let Some(a) = args.subcommand_matches("info") {
        // render helpers may want the engine, but info should degrade
        let engine = match DockerCli::connect() {
            Ok(e) => Some(Arc::new(e) as Arc<dyn EngineClient>),
            Err(e) => {
                warn!("No engine available for template helpers: {}", e);
                None
            }
        };
        let mf = load_manifest(a, engine)?;
        return mf.print();
    }

    // remaining verbs all talk to the engine
    let engine: Arc<dyn EngineClient> = Arc::new(DockerCli::connect()?);

    if let Some(a) = args.subcommand_matches("run") {
        let mf = load_manifest(a, Some(engine.clone()))?;
        let wait = value_t!(a.value_of("wait"), u64).unwrap_or(0);
        let observed = engine.list(&mf.namespace)?;
        let plan = diff::diff(&mf.members(), &observed, Duration::from_secs(wait))?;
        let opts = RunOptions {
            dry_run: a.is_present("dry"),
            ..Default::default()
        };
        let report = runner::execute(engine, &plan, &mf.manifest_digest(), &opts, &CANCEL)?;
        if a.is_present("print") {
            report.print()?;
        }
        return Ok(());
    }

    if let Some(a) = args.subcommand_matches("pull") {
        let mf = load_manifest(a, Some(engine.clone()))?;
        let mut plan = Plan::default();
        for image in mf.images() {
            plan.actions.push(Action::new(
                Op::EnsureImage(image.clone()),
                &image.to_string(),
                "pull requested",
            ));
        }
        let report = runner::execute(
            engine,
            &plan,
            &mf.manifest_digest(),
            &RunOptions::default(),
            &CANCEL,
        )?;
        if a.is_present("print") {
            report.print()?;
        }
        return Ok(());
    }

    if let Some(a) = args.subcommand_matches("rm") {
        let mf = load_manifest(a, Some(engine.clone()))?;
        let observed = engine.list(&mf.namespace)?;
        let plan = diff::removal_plan(&mf.members(), &observed)?;
        let opts = RunOptions {
            dry_run: a.is_present("dry"),
            ..Default::default()
        };
        let report = runner::execute(engine, &plan, &mf.manifest_digest(), &opts, &CANCEL)?;
        if a.is_present("print") {
            report.print()?;
        }
        return Ok(());
    }

    if let Some(a) = args.subcommand_matches("clean") {
        let mf = load_manifest(a, Some(engine.clone()))?;
        let keep = value_t!(a.value_of("keep"), usize).unwrap_or(5);
        let removed = retention::clean(&*engine, &mf, keep, a.is_present("dry"))?;
        info!("Removed {} old image revisions", removed.len());
        return Ok(());
    }

    unreachable!("Subcommand valid, but not implemented");
}

// Assemble the variable bag and load the manifest, from a file or archive.
// Precedence: --vars file, then archive artifacts, then --var flags.
fn load_manifest(a: &ArgMatches, engine: Option<Arc<dyn EngineClient>>) -> Result<Manifest> {
    let mut vars = VariableBag::new();
    if let Some(vf) = a.value_of("vars") {
        vars.extend(load_vars_file(Path::new(vf))?);
    }

    let file = a.value_of("file").unwrap_or("compose.yml");
    if a.is_present("tar") {
        let release = archive::load(Path::new(file))?;
        if a.is_present("demand-artifacts") && release.artifacts.is_empty() {
            bail!("archive {} carries no artifacts", file);
        }
        vars.extend(release.vars);
        apply_cli_vars(a, &mut vars)?;
        Manifest::from_raw(&release.manifest, &vars, engine)
    } else {
        apply_cli_vars(a, &mut vars)?;
        Manifest::load(Path::new(file), &vars, engine)
    }
}

fn apply_cli_vars(a: &ArgMatches, vars: &mut VariableBag) -> Result<()> {
    if let Some(vs) = a.values_of("var") {
        for v in vs {
            let (k, v) = parse_var(v)?;
            vars.insert(k, v);
        }
    }
    Ok(())
}
