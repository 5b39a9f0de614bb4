//! Interactive execution loop.
//!
//! Per iteration: read two hexadecimal integers, invoke the entry function,
//! print the decimal result, and ask whether to go again. Any failed read or
//! non-hex input is an error the driver turns into an immediate failure
//! shutdown.

use anyhow::{anyhow, Context as _};
use rustyline::DefaultEditor;

/// Drive the compiled entry function with interactive input.
pub fn drive(entry: extern "C" fn(i32, i32) -> i32) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;

    loop {
        let a = read_hex(&mut editor, "a = ")?;
        let b = read_hex(&mut editor, "b = ")?;

        let result = entry(a, b);
        println!("{a} + {b} = {result}");

        let answer = editor
            .readline("Again? (y/n) ")
            .context("failed to read continuation answer")?;
        if !matches!(answer.trim(), "y" | "Y") {
            return Ok(());
        }
        println!();
    }
}

fn read_hex(editor: &mut DefaultEditor, prompt: &str) -> anyhow::Result<i32> {
    let line = editor
        .readline(prompt)
        .with_context(|| format!("failed to read input for `{}`", prompt.trim()))?;

    let digits = line.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);

    // Hexadecimal, like the bit pattern it names: "80000000" is i32::MIN.
    u32::from_str_radix(digits, 16)
        .map(|value| value as i32)
        .map_err(|_| anyhow!("malformed hexadecimal input `{}`", line.trim()))
}
