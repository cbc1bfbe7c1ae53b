// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The closed fault space reported by the rest of the agent.
//!
//! Every failure a lower layer can report is one variant here, and
//! [`ErrorCode::classify`] maps each variant to exactly one recovery action.
//! The `match` deliberately has no wildcard arm: adding a variant without
//! classifying it is a compile error, not a silently-ignored failure mode.

use serde::{Deserialize, Serialize};

/// Error codes the agent's subsystems report into
/// [`PayloadState::update_failed`].
///
/// The `*Flag` variants and the aggregate markers are not real failures;
/// they exist so that logs and wire reports share one vocabulary with this
/// state machine. They classify as [`FaultClass::Sentinel`].
///
/// [`PayloadState::update_failed`]: crate::PayloadState::update_failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    Success,
    /// Generic failure with no more specific code.
    Error,
    OmahaRequest,
    OmahaResponseHandler,
    FilesystemCopier,
    PostinstallRunner,
    /// Historical; nothing reports it anymore.
    SetBootableFlag,
    InstallDeviceOpen,
    KernelDeviceOpen,
    DownloadTransfer,
    PayloadHashMismatch,
    PayloadSizeMismatch,
    DownloadPayloadVerification,
    DownloadNewPartitionInfo,
    DownloadWrite,
    NewRootfsVerification,
    NewKernelVerification,
    SignedDeltaPayloadExpected,
    DownloadPayloadPubKeyVerification,
    PostinstallBootedFromFirmwareB,
    DownloadStateInitialization,
    DownloadInvalidMetadataMagicString,
    DownloadSignatureMissingInManifest,
    DownloadManifestParse,
    DownloadMetadataSignature,
    DownloadMetadataSignatureVerification,
    DownloadMetadataSignatureMismatch,
    DownloadOperationHashVerification,
    DownloadOperationExecution,
    DownloadOperationHashMismatch,
    OmahaRequestEmptyResponse,
    OmahaRequestXmlParse,
    DownloadInvalidMetadataSize,
    DownloadInvalidMetadataSignature,
    OmahaResponseInvalid,
    OmahaUpdateIgnoredPerPolicy,
    OmahaUpdateDeferredPerPolicy,
    /// Aggregate code for HTTP-level failures during the update check.
    OmahaErrorInHttpResponse,
    DownloadOperationHashMissing,
    DownloadMetadataSignatureMissing,
    OmahaUpdateDeferredForBackoff,
    PostinstallPowerwash,
    UpdateCanceledByChannelChange,
    UmaReportedMax,
    OmahaRequestHttpResponseBase,
    DevModeFlag,
    ResumedFlag,
    TestImageFlag,
    TestOmahaUrlFlag,
}

/// The recovery action a failure calls for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultClass {
    /// The payload fetched over the current URL was corrupt or unverifiable.
    /// The URL, its proxies, or something else in that path is suspect;
    /// rotate to the next URL.
    PayloadFault,
    /// A transient network or local-write failure that says nothing about
    /// the URL itself. Keep the URL and charge one failure against it;
    /// earlier URLs are preferred (often cheaper), so give them chances.
    TransientFault,
    /// Not attributable to the current URL at all (update-check plumbing,
    /// post-install, policy deferrals). Neither the URL index nor the
    /// failure count moves.
    NonUrlFault,
    /// A success code or pseudo-code that should never be reported as a
    /// failure in the first place.
    Sentinel,
}

impl ErrorCode {
    /// Maps this code to its recovery action. Exhaustive on purpose; see the
    /// module docs.
    pub fn classify(self) -> FaultClass {
        use ErrorCode::*;
        match self {
            PayloadHashMismatch
            | PayloadSizeMismatch
            | DownloadPayloadVerification
            | DownloadPayloadPubKeyVerification
            | SignedDeltaPayloadExpected
            | DownloadInvalidMetadataMagicString
            | DownloadSignatureMissingInManifest
            | DownloadManifestParse
            | DownloadMetadataSignature
            | DownloadMetadataSignatureVerification
            | DownloadMetadataSignatureMismatch
            | DownloadOperationHashVerification
            | DownloadOperationExecution
            | DownloadOperationHashMismatch
            | DownloadInvalidMetadataSize
            | DownloadInvalidMetadataSignature
            | DownloadOperationHashMissing
            | DownloadMetadataSignatureMissing => FaultClass::PayloadFault,

            Error
            | DownloadTransfer
            | DownloadWrite
            | DownloadStateInitialization
            | OmahaErrorInHttpResponse => FaultClass::TransientFault,

            OmahaRequest
            | OmahaResponseHandler
            | PostinstallRunner
            | FilesystemCopier
            | InstallDeviceOpen
            | KernelDeviceOpen
            | DownloadNewPartitionInfo
            | NewRootfsVerification
            | NewKernelVerification
            | PostinstallBootedFromFirmwareB
            | OmahaRequestEmptyResponse
            | OmahaRequestXmlParse
            | OmahaResponseInvalid
            | OmahaUpdateIgnoredPerPolicy
            | OmahaUpdateDeferredPerPolicy
            | OmahaUpdateDeferredForBackoff
            | PostinstallPowerwash
            | UpdateCanceledByChannelChange => FaultClass::NonUrlFault,

            Success
            | SetBootableFlag
            | UmaReportedMax
            | OmahaRequestHttpResponseBase
            | DevModeFlag
            | ResumedFlag
            | TestImageFlag
            | TestOmahaUrlFlag => FaultClass::Sentinel,
        }
    }
}
