use state_machines::state_machine;

state_machine! {
    name: RegistrationMachine,
    state: RegistrationState,
    initial: Ready,
    states: [
        Ready,
        ConfigurationLoaded,
        SignedIn,
        EmbeddingStarted,
        StoreConnected,
        DocumentsRegistered,
        Committed,
        Failed
    ],
    events {
        load_configuration { transition: { from: Ready, to: ConfigurationLoaded } }
        verify_signin { transition: { from: ConfigurationLoaded, to: SignedIn } }
        start_embedding { transition: { from: SignedIn, to: EmbeddingStarted } }
        connect_store { transition: { from: EmbeddingStarted, to: StoreConnected } }
        register_documents { transition: { from: StoreConnected, to: DocumentsRegistered } }
        commit { transition: { from: DocumentsRegistered, to: Committed } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: ConfigurationLoaded, to: Failed }
            transition: { from: SignedIn, to: Failed }
            transition: { from: EmbeddingStarted, to: Failed }
            transition: { from: StoreConnected, to: Failed }
            transition: { from: DocumentsRegistered, to: Failed }
        }
    }
}

pub fn ready() -> RegistrationMachine<(), Ready> {
    RegistrationMachine::new(())
}
