fn main() {
    let (options, handled) = parse_args();
    if handled {
        return;
    }

    if let Err(err) = reelix::run(options) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn parse_args() -> (reelix::app::RunOptions, bool) {
    let mut options = reelix::app::RunOptions::default();
    let mut handled = false;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Reelix {}", reelix::VERSION);
                handled = true;
            }
            "--help" | "-h" => {
                println!(
                    "Reelix — Watch a short-form video feed from the terminal.\n\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message\n  --check-updates      Check for updates and exit\n  --offline            Browse a built-in sample feed without a backend\n  --video <id>         Open the feed at this video"
                );
                handled = true;
            }
            "--check-updates" => {
                handled = true;
                if let Err(err) = check_updates_once() {
                    eprintln!("Update check failed: {err:?}");
                    std::process::exit(1);
                }
            }
            "--offline" => {
                options.offline = true;
            }
            "--video" => match args.next() {
                Some(id) if !id.starts_with('-') => options.video_id = Some(id),
                _ => {
                    eprintln!("error: --video needs a video id");
                    std::process::exit(2);
                }
            },
            other => {
                eprintln!("error: unknown argument {other:?} (try --help)");
                std::process::exit(2);
            }
        }
    }
    (options, handled)
}

fn check_updates_once() -> anyhow::Result<()> {
    use semver::Version;

    let skip_env = reelix::update::SKIP_UPDATE_ENV;
    if std::env::var(skip_env).is_ok() {
        println!("Update check skipped: {skip_env} is set.");
        return Ok(());
    }

    let current = Version::parse(reelix::VERSION)?;
    match reelix::update::check_for_update(&current)? {
        Some(info) => {
            let reelix::update::UpdateInfo {
                version,
                release_url,
            } = info;
            println!("Update available: {current} -> {version}\n{release_url}");
        }
        None => {
            println!("Reelix {current} is up to date.");
        }
    }
    Ok(())
}
