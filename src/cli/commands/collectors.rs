use crate::collectors::{SCRAPER_NAMES, enabled_by_default};
use clap::{Arg, ArgAction, Command};

/// Add `--collector.<name>` and `--no-collector.<name>` for every scraper.
pub fn add_collectors_args(mut cmd: Command) -> Command {
    for &name in SCRAPER_NAMES {
        let default_enabled = enabled_by_default(name).unwrap_or(false);

        let default_indicator = if default_enabled {
            "enabled"
        } else {
            "disabled"
        };

        let enable_flag = format!("collector.{name}");
        let disable_flag = format!("no-collector.{name}");

        cmd = cmd
            .arg(
                Arg::new(enable_flag.clone())
                    .long(enable_flag.clone())
                    .help(format!(
                        "Enable the {name} scraper [default: {default_indicator}]"
                    ))
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new(disable_flag.clone())
                    .long(disable_flag)
                    .help(format!("Disable the {name} scraper"))
                    .action(ArgAction::SetTrue)
                    .overrides_with(enable_flag),
            );
    }

    cmd
}
