pub mod coordinator;
pub mod form;
pub mod oauth;

pub use coordinator::{
    Continuation, CoordinatorState, FormOutcome, Interaction, InteractionCoordinator,
    InteractionError, InteractionHost, InteractionKind, InteractionResult, OAuthSettings,
    ObserveReport,
};
pub use form::{FieldError, FieldType, FormField, FormSection, SmartFormSchema};
pub use oauth::{
    AuthMechanism, AuthWindow, AuthorizationOutcome, MessagePort, OAuthListener,
    OAuthRequirement, PopupBlocked, PortDelivery, WindowMessage,
};
