//! Context types: one pair of (kind, control-flow state) per processing event a pipeline
//! dispatches handlers for (§4.1, §4.2). A context carries no payload of its own — the
//! request and response data handlers read and mutate lives on the [`Transaction`] passed
//! alongside it; the context exists purely to key handler registration to a processing
//! event and to carry that event's short-circuit flags.
use crate::error::Rejection;

/// Identifies one processing event within an endpoint pipeline. Distinct from the
/// endpoint itself: a single endpoint dispatches through several of these in sequence
/// (§4.5's Extract, Validate, Handle, Apply phases).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum ContextKind {
    ExtractAuthorizationRequest,
    ValidateAuthorizationRequest,
    HandleAuthorizationRequest,
    ApplyAuthorizationResponse,

    ExtractTokenRequest,
    ValidateTokenRequest,
    HandleTokenRequest,
    ApplyTokenResponse,

    ExtractDeviceRequest,
    ValidateDeviceRequest,
    HandleDeviceRequest,
    ApplyDeviceResponse,

    ExtractVerificationRequest,
    ValidateVerificationRequest,
    HandleVerificationRequest,
    ApplyVerificationResponse,

    ExtractIntrospectionRequest,
    ValidateIntrospectionRequest,
    HandleIntrospectionRequest,
    ApplyIntrospectionResponse,

    ExtractRevocationRequest,
    ValidateRevocationRequest,
    HandleRevocationRequest,
    ApplyRevocationResponse,

    ExtractUserinfoRequest,
    ValidateUserinfoRequest,
    HandleUserinfoRequest,
    ApplyUserinfoResponse,

    ExtractConfigurationRequest,
    HandleConfigurationRequest,
    ApplyConfigurationResponse,

    ExtractCryptographyRequest,
    HandleCryptographyRequest,
    ApplyCryptographyResponse,

    ExtractLogoutRequest,
    ValidateLogoutRequest,
    HandleLogoutRequest,
    ApplyLogoutResponse,

    ProcessSignIn,
    ProcessAuthentication,
}

/// Short-circuit state a handler can set on the context it was invoked with (§4.2).
/// `IsRequestHandled` and `IsRequestSkipped` both stop the remaining handlers in the same
/// list from running but are distinguished for logging and host-visible semantics;
/// `reject` additionally records why the transaction is being failed (§7).
#[derive(Default)]
pub struct ControlFlow {
    handled: bool,
    skipped: bool,
    rejection: Option<Rejection>,
}

impl ControlFlow {
    pub fn is_request_handled(&self) -> bool {
        self.handled
    }

    pub fn is_request_skipped(&self) -> bool {
        self.skipped
    }

    pub fn is_rejected(&self) -> bool {
        self.rejection.is_some()
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        self.rejection.as_ref()
    }

    pub fn handle_request(&mut self) {
        self.handled = true;
    }

    pub fn skip_request(&mut self) {
        self.skipped = true;
    }

    pub fn reject(&mut self, rejection: Rejection) {
        self.rejection = Some(rejection);
    }

    /// `true` if any flag tells the dispatcher to stop walking the handler list (§4.2).
    pub fn should_stop(&self) -> bool {
        self.handled || self.skipped || self.rejection.is_some()
    }
}

/// A handler-dispatch context: ties a [`ControlFlow`] to a fixed [`ContextKind`] so the
/// dispatcher and `HandlerList<C>` can be generic over it while still routing by kind.
pub trait Context: Send + Sync + 'static {
    const KIND: ContextKind;

    fn new() -> Self;
    fn control(&self) -> &ControlFlow;
    fn control_mut(&mut self) -> &mut ControlFlow;

    fn is_request_handled(&self) -> bool {
        self.control().is_request_handled()
    }

    fn is_request_skipped(&self) -> bool {
        self.control().is_request_skipped()
    }

    fn is_rejected(&self) -> bool {
        self.control().is_rejected()
    }

    fn rejection(&self) -> Option<&Rejection> {
        self.control().rejection()
    }

    fn handle_request(&mut self) {
        self.control_mut().handle_request();
    }

    fn skip_request(&mut self) {
        self.control_mut().skip_request();
    }

    fn reject(&mut self, rejection: Rejection) {
        self.control_mut().reject(rejection);
    }
}

macro_rules! define_contexts {
    ($module:ident => $($name:ident: $kind:ident),+ $(,)?) => {
        pub mod $module {
            use super::{Context, ContextKind, ControlFlow};

            $(
                #[derive(Default)]
                pub struct $name {
                    control: ControlFlow,
                }

                impl Context for $name {
                    const KIND: ContextKind = ContextKind::$kind;

                    fn new() -> Self {
                        $name::default()
                    }

                    fn control(&self) -> &ControlFlow {
                        &self.control
                    }

                    fn control_mut(&mut self) -> &mut ControlFlow {
                        &mut self.control
                    }
                }
            )+
        }
    };
}

define_contexts!(authorization =>
    ExtractAuthorizationRequest: ExtractAuthorizationRequest,
    ValidateAuthorizationRequest: ValidateAuthorizationRequest,
    HandleAuthorizationRequest: HandleAuthorizationRequest,
    ApplyAuthorizationResponse: ApplyAuthorizationResponse,
);

define_contexts!(token =>
    ExtractTokenRequest: ExtractTokenRequest,
    ValidateTokenRequest: ValidateTokenRequest,
    HandleTokenRequest: HandleTokenRequest,
    ApplyTokenResponse: ApplyTokenResponse,
);

define_contexts!(device =>
    ExtractDeviceRequest: ExtractDeviceRequest,
    ValidateDeviceRequest: ValidateDeviceRequest,
    HandleDeviceRequest: HandleDeviceRequest,
    ApplyDeviceResponse: ApplyDeviceResponse,
);

define_contexts!(verification =>
    ExtractVerificationRequest: ExtractVerificationRequest,
    ValidateVerificationRequest: ValidateVerificationRequest,
    HandleVerificationRequest: HandleVerificationRequest,
    ApplyVerificationResponse: ApplyVerificationResponse,
);

define_contexts!(introspection =>
    ExtractIntrospectionRequest: ExtractIntrospectionRequest,
    ValidateIntrospectionRequest: ValidateIntrospectionRequest,
    HandleIntrospectionRequest: HandleIntrospectionRequest,
    ApplyIntrospectionResponse: ApplyIntrospectionResponse,
);

define_contexts!(revocation =>
    ExtractRevocationRequest: ExtractRevocationRequest,
    ValidateRevocationRequest: ValidateRevocationRequest,
    HandleRevocationRequest: HandleRevocationRequest,
    ApplyRevocationResponse: ApplyRevocationResponse,
);

define_contexts!(userinfo =>
    ExtractUserinfoRequest: ExtractUserinfoRequest,
    ValidateUserinfoRequest: ValidateUserinfoRequest,
    HandleUserinfoRequest: HandleUserinfoRequest,
    ApplyUserinfoResponse: ApplyUserinfoResponse,
);

define_contexts!(discovery =>
    ExtractConfigurationRequest: ExtractConfigurationRequest,
    HandleConfigurationRequest: HandleConfigurationRequest,
    ApplyConfigurationResponse: ApplyConfigurationResponse,
);

define_contexts!(cryptography =>
    ExtractCryptographyRequest: ExtractCryptographyRequest,
    HandleCryptographyRequest: HandleCryptographyRequest,
    ApplyCryptographyResponse: ApplyCryptographyResponse,
);

define_contexts!(logout =>
    ExtractLogoutRequest: ExtractLogoutRequest,
    ValidateLogoutRequest: ValidateLogoutRequest,
    HandleLogoutRequest: HandleLogoutRequest,
    ApplyLogoutResponse: ApplyLogoutResponse,
);

define_contexts!(signin =>
    ProcessSignIn: ProcessSignIn,
    ProcessAuthentication: ProcessAuthentication,
);

#[cfg(test)]
mod tests {
    use super::authorization::ExtractAuthorizationRequest;
    use super::Context;

    #[test]
    fn fresh_context_has_no_flags_set() {
        let ctx = ExtractAuthorizationRequest::new();
        assert!(!ctx.is_request_handled());
        assert!(!ctx.is_request_skipped());
        assert!(!ctx.is_rejected());
    }

    #[test]
    fn reject_is_visible_through_the_trait() {
        let mut ctx = ExtractAuthorizationRequest::new();
        ctx.reject(
            crate::error::Rejection::new(crate::error::ProtocolErrorCode::InvalidRequest)
                .with_description("missing client_id"),
        );
        assert!(ctx.is_rejected());
        assert!(ctx.control().should_stop());
    }
}
