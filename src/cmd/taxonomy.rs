//! `tribunal taxonomy`

use console::style;
use tribunal_common::{Verdict, VerdictLabel};

pub fn cmd_taxonomy() {
    println!();
    println!("Verdict labels");
    println!("==============");
    println!();
    for verdict in Verdict::ALL {
        println!(
            "  {:<16} {}",
            style(verdict.label()).bold(),
            verdict.description()
        );
    }
    println!();
    println!(
        "A session whose synthesizer names none of these reports '{}'.",
        VerdictLabel::UNRESOLVED
    );
    println!();
}
