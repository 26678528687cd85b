use console::Style;

const BANNER: &str = r#"
                 _   _
  _ __   __ _ | |_| |_  ___  _ __
 | '_ \ / _` || __| __|/ _ \| '__|
 | | | | (_| || |_| |_|  __/| |
 |_| |_|\__,_| \__|\__|\___||_|"#;

/// Print the startup banner with version info.
pub fn print_banner() {
    let green = Style::new().green().bold();
    let dim = Style::new().dim();

    println!("{}", green.apply_to(BANNER));
    println!(
        "  {}",
        dim.apply_to(format!("v{} peer-to-peer chat", env!("CARGO_PKG_VERSION")))
    );
    println!();
}
