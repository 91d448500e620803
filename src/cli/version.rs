fn banner() -> String {
    format!(
        "starboard {}\nOperator CLI for the starboard relay",
        env!("CARGO_PKG_VERSION")
    )
}

/// Display version information
pub fn execute() {
    println!("{}", banner());
}
