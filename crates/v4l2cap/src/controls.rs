// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{v4l2::Driver, Error};

/// Device controls collaborator (brightness, exposure and the like).
///
/// [`Controls::init`] runs once the device is streaming and returns a handle
/// the session keeps until it closes, at which point [`Controls::deinit`]
/// receives it back.
pub trait Controls<D: Driver> {
    type Handle;

    fn init(&mut self, driver: &mut D) -> Result<Self::Handle, Error>;

    fn deinit(&mut self, handle: Self::Handle);
}

/// No device controls.
impl<D: Driver> Controls<D> for () {
    type Handle = ();

    fn init(&mut self, _driver: &mut D) -> Result<(), Error> {
        Ok(())
    }

    fn deinit(&mut self, _handle: ()) {}
}
