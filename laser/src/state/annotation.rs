// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use std::any::Any;

/// A typed per-path scratchpad attached to a global state. Detection modules
/// keep their in-flight observations here; the bag is copied on fork (each
/// variant defines its own copy semantics via `clone_on_fork`) and dropped
/// with the state, so a detector only ever sees facts established on the
/// path it is observing.
pub trait StateAnnotation: Any {
    fn clone_on_fork(&self) -> Box<dyn StateAnnotation>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl Clone for Box<dyn StateAnnotation> {
    fn clone(&self) -> Self {
        self.clone_on_fork()
    }
}
