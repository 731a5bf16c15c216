/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    File contains crypto utilities needed to generate and verify images.

--*/

mod openssl;

pub use crate::openssl::{OsslCrypto, OsslRsaPrivKey};
