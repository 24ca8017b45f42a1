//! Primitive pour l'initialisation unique
//!
//! Ce module fournit une implémentation de Once qui garantit qu'une
//! initialisation n'est exécutée qu'une seule fois, même si plusieurs
//! processeurs la demandent simultanément.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::cpu;

/// État possible pour une valeur Once
const INCOMPLETE: u8 = 0;
const RUNNING: u8 = 1;
const COMPLETE: u8 = 2;

/// Cellule d'initialisation unique.
pub struct Once<T> {
    state: AtomicU8,
    data: UnsafeCell<MaybeUninit<T>>,
}

unsafe impl<T: Send + Sync> Sync for Once<T> {}
unsafe impl<T: Send> Send for Once<T> {}

impl<T> Once<T> {
    /// Crée une nouvelle cellule vide.
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(INCOMPLETE),
            data: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Exécute `f` si la cellule n'a jamais été initialisée, puis retourne
    /// une référence à la valeur. Les appelants concurrents attendent
    /// activement la fin de l'initialisation en cours.
    pub fn call_once<F>(&self, f: F) -> &T
    where
        F: FnOnce() -> T,
    {
        // Vérification rapide sans verrouillage
        if self.state.load(Ordering::Acquire) == COMPLETE {
            return unsafe { (*self.data.get()).assume_init_ref() };
        }

        if self
            .state
            .compare_exchange(INCOMPLETE, RUNNING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            let value = f();
            unsafe {
                (*self.data.get()).write(value);
            }
            self.state.store(COMPLETE, Ordering::Release);
            return unsafe { (*self.data.get()).assume_init_ref() };
        }

        // Un autre processeur initialise : attendre la fin.
        while self.state.load(Ordering::Acquire) != COMPLETE {
            cpu::relax();
        }
        unsafe { (*self.data.get()).assume_init_ref() }
    }

    /// Retourne la valeur si elle est initialisée.
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == COMPLETE {
            Some(unsafe { (*self.data.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// Vérifie si la valeur a été initialisée.
    pub fn is_initialized(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMPLETE
    }
}

impl<T> Default for Once<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Once<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == COMPLETE {
            unsafe {
                (*self.data.get()).assume_init_drop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_once_runs_once() {
        let once: Once<u32> = Once::new();
        assert!(!once.is_initialized());
        assert_eq!(*once.call_once(|| 41), 41);
        // La seconde fermeture ne doit pas être exécutée.
        assert_eq!(*once.call_once(|| 99), 41);
        assert_eq!(once.get(), Some(&41));
    }
}
