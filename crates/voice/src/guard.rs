//! Reihenfolge-Waechter fuer asynchrone Vorgaenge
//!
//! - `NeuesteAnfrage`: Last-Writer-Wins. Jede Anfrage zieht ein Token; nur
//!   das zuletzt gezogene Token darf sein Ergebnis anwenden.
//! - `EinzelFlug`: Hoechstens ein Vorgang gleichzeitig; weitere Aufrufe
//!   waehrend eines laufenden Vorgangs werden verworfen.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, MutexGuard, Semaphore};

/// Token einer einzelnen Anfrage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnfrageToken(u64);

/// Last-Writer-Wins-Waechter fuer Hot-Swaps einer Geraeteart
#[derive(Debug, Default)]
pub struct NeuesteAnfrage {
    zaehler: AtomicU64,
    anwenden: Mutex<()>,
}

impl NeuesteAnfrage {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Beginnt eine neue Anfrage; alle vorherigen Tokens werden veraltet
    pub fn beginnen(&self) -> AnfrageToken {
        AnfrageToken(self.zaehler.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn ist_aktuell(&self, token: AnfrageToken) -> bool {
        self.zaehler.load(Ordering::SeqCst) == token.0
    }

    /// Sperre fuer den Anwendungsschritt
    ///
    /// Innerhalb der Sperre muss `ist_aktuell` erneut geprueft werden.
    pub async fn sperren(&self) -> MutexGuard<'_, ()> {
        self.anwenden.lock().await
    }

    /// Erklaert alle laufenden Anfragen fuer veraltet (z.B. beim Aufraeumen)
    pub fn verwerfen_alle(&self) {
        self.zaehler.fetch_add(1, Ordering::SeqCst);
    }
}

/// Single-in-flight-Waechter
#[derive(Debug)]
pub struct EinzelFlug {
    erlaubnis: Semaphore,
}

impl Default for EinzelFlug {
    fn default() -> Self {
        Self::neu()
    }
}

impl EinzelFlug {
    pub fn neu() -> Self {
        Self {
            erlaubnis: Semaphore::new(1),
        }
    }

    /// Fuehrt `f` aus, falls kein anderer Vorgang laeuft
    ///
    /// Gibt `None` zurueck, wenn bereits ein Vorgang aktiv ist.
    pub async fn ausfuehren<F, Fut, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _erlaubnis = self.erlaubnis.try_acquire().ok()?;
        Some(f().await)
    }

    pub fn ist_aktiv(&self) -> bool {
        self.erlaubnis.available_permits() == 0
    }
}
