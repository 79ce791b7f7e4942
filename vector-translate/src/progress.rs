//! Affichage de la progression sur le terminal
//!
//! Format `0...10...20...30...40...50...60...70...80...90...100 - done.`:
//! un point tous les 2,5 %, un nombre tous les 10 %.

use std::io::{self, Stdout, Write};

/// Nombre de pas (2,5 % chacun)
const TICKS: u32 = 40;

pub struct TermProgress<W: Write> {
    out: W,
    /// Dernier pas affiché
    last_tick: Option<u32>,
}

impl TermProgress<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TermProgress<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            last_tick: None,
        }
    }

    /// Affiche les pas franchis jusqu'à `fraction` (0.0 à 1.0)
    pub fn update(&mut self, fraction: f64) {
        let tick = (fraction.clamp(0.0, 1.0) * f64::from(TICKS)).floor() as u32;
        let first = match self.last_tick {
            Some(last) if tick <= last => return,
            Some(last) => last + 1,
            None => 0,
        };

        // Erreurs d'écriture ignorées: la progression reste indicative
        for t in first..=tick {
            let _ = if t % 4 == 0 {
                write!(self.out, "{}", t / 4 * 10)
            } else {
                write!(self.out, ".")
            };
        }
        if tick == TICKS {
            let _ = writeln!(self.out, " - done.");
        }
        let _ = self.out.flush();
        self.last_tick = Some(tick);
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(steps: &[f64]) -> String {
        let mut progress = TermProgress::new(Vec::new());
        for step in steps {
            progress.update(*step);
        }
        String::from_utf8(progress.into_inner()).unwrap()
    }

    #[test]
    fn test_full_run() {
        assert_eq!(
            render(&[0.0, 0.5, 1.0]),
            "0...10...20...30...40...50...60...70...80...90...100 - done.\n"
        );
    }

    #[test]
    fn test_partial_and_monotonic() {
        assert_eq!(render(&[0.0, 0.24, 0.1]), "0...10...20.");
    }

    #[test]
    fn test_done_printed_once() {
        let output = render(&[1.0, 1.0]);
        assert_eq!(output.matches("done").count(), 1);
    }
}
