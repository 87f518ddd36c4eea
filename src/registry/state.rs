//! Protocol phases of a refinement cycle.

use crate::mesh_error::MeshError;

/// Where the registry is in the registration/reconciliation protocol.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum RegistryState {
    #[default]
    None,
    StartRegister,
    EndRegister,
    StartCheckForRemote,
    EndCheckForRemote,
    StartGetFromRemote,
    EndGetFromRemote,
    /// A cycle failed; only `initialize` leaves this state.
    Aborted,
}

impl RegistryState {
    /// States from which a new registration cycle may begin.
    pub fn can_begin_cycle(self) -> bool {
        matches!(self, RegistryState::None | RegistryState::EndGetFromRemote)
    }

    /// The state that must precede `self` in a cycle.
    pub fn predecessor(self) -> Option<RegistryState> {
        use RegistryState::*;
        match self {
            StartRegister | None | Aborted => Option::None,
            EndRegister => Some(StartRegister),
            StartCheckForRemote => Some(EndRegister),
            EndCheckForRemote => Some(StartCheckForRemote),
            StartGetFromRemote => Some(EndCheckForRemote),
            EndGetFromRemote => Some(StartGetFromRemote),
        }
    }

    /// Move to `next`, checking the protocol order.
    pub fn advance(&mut self, op: &'static str, next: RegistryState) -> Result<(), MeshError> {
        let ok = match next {
            RegistryState::StartRegister => self.can_begin_cycle(),
            other => other.predecessor() == Some(*self),
        };
        if !ok {
            let expected = match next {
                RegistryState::StartRegister => RegistryState::None,
                other => other.predecessor().unwrap_or_default(),
            };
            return Err(MeshError::StateViolation {
                op,
                expected,
                found: *self,
            });
        }
        *self = next;
        Ok(())
    }

    /// Fail unless the registry is exactly in `expected`.
    pub fn require(self, op: &'static str, expected: RegistryState) -> Result<(), MeshError> {
        if self == expected {
            Ok(())
        } else {
            Err(MeshError::StateViolation {
                op,
                expected,
                found: self,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle_then_restart() {
        use RegistryState::*;
        let mut s = RegistryState::default();
        for next in [
            StartRegister,
            EndRegister,
            StartCheckForRemote,
            EndCheckForRemote,
            StartGetFromRemote,
            EndGetFromRemote,
            StartRegister,
        ] {
            s.advance("test", next).unwrap();
        }
        assert_eq!(s, StartRegister);
    }

    #[test]
    fn out_of_order_is_a_state_violation() {
        let mut s = RegistryState::StartRegister;
        let err = s
            .advance("begin_check_for_remote", RegistryState::StartCheckForRemote)
            .unwrap_err();
        assert_eq!(
            err,
            MeshError::StateViolation {
                op: "begin_check_for_remote",
                expected: RegistryState::EndRegister,
                found: RegistryState::StartRegister,
            }
        );
        assert_eq!(s, RegistryState::StartRegister);
    }

    #[test]
    fn aborted_blocks_new_cycles() {
        let mut s = RegistryState::Aborted;
        assert!(s.advance("begin_registration", RegistryState::StartRegister).is_err());
    }
}
